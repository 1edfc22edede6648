//! The `MigrationStore` trait.
//!
//! Implemented by storage backends (e.g. `schemalog-store-sqlite`). The CLI
//! depends on this abstraction, not on any concrete backend.

use std::{future::Future, time::Duration};

use crate::{
  lock::{LockAcquisition, LockState},
  migration::{
    MigrationRecord, RepeatableOutcome, RepeatableRecord, RollbackRecord, VersionedOutcome,
  },
};

/// Abstraction over a migration ledger backend.
///
/// Every mutating migration operation requires that [`principal`] holds the
/// lock; backends check this in the same transaction that executes the SQL.
/// Read operations never need the lock.
///
/// [`principal`]: MigrationStore::principal
pub trait MigrationStore: Send + Sync {
  type Error: std::error::Error + Send + Sync + 'static;

  /// Identity recorded as `applied_by` and required to hold the lock.
  fn principal(&self) -> &str;

  // ── Lock ──────────────────────────────────────────────────────────────

  /// Take the global migration lock for `holder` for at most `timeout`.
  ///
  /// Fails if another holder has an unexpired lock. Re-acquiring by the same
  /// holder renews the lock; an expired lock of another holder is reclaimed.
  fn acquire_lock<'a>(
    &'a self,
    holder: &'a str,
    timeout: Duration,
  ) -> impl Future<Output = Result<LockAcquisition, Self::Error>> + Send + 'a;

  /// Release the lock. Fails unless `holder` currently holds it.
  fn release_lock<'a>(
    &'a self,
    holder: &'a str,
  ) -> impl Future<Output = Result<(), Self::Error>> + Send + 'a;

  /// Whether an unexpired lock exists.
  fn is_locked(&self) -> impl Future<Output = Result<bool, Self::Error>> + Send + '_;

  /// The stored lock row, stale or not.
  fn lock_holder(
    &self,
  ) -> impl Future<Output = Result<Option<LockState>, Self::Error>> + Send + '_;

  // ── Runner ────────────────────────────────────────────────────────────

  /// Apply a versioned migration once.
  ///
  /// A version that is already applied with the same body is a no-op; one
  /// applied with a different body is a checksum mismatch.
  fn run_versioned<'a>(
    &'a self,
    version: &'a str,
    description: &'a str,
    sql: &'a str,
    rollback_sql: Option<&'a str>,
  ) -> impl Future<Output = Result<VersionedOutcome, Self::Error>> + Send + 'a;

  /// Apply a repeatable migration if its body changed since the last run.
  fn run_repeatable<'a>(
    &'a self,
    name: &'a str,
    description: &'a str,
    sql: &'a str,
  ) -> impl Future<Output = Result<RepeatableOutcome, Self::Error>> + Send + 'a;

  /// Run the stored rollback script of an applied versioned migration.
  fn rollback<'a>(
    &'a self,
    version: &'a str,
  ) -> impl Future<Output = Result<MigrationRecord, Self::Error>> + Send + 'a;

  // ── Status ────────────────────────────────────────────────────────────

  /// Every changelog row, applied or rolled back, in natural version order.
  fn list_applied(
    &self,
  ) -> impl Future<Output = Result<Vec<MigrationRecord>, Self::Error>> + Send + '_;

  fn get_migration<'a>(
    &'a self,
    version: &'a str,
  ) -> impl Future<Output = Result<Option<MigrationRecord>, Self::Error>> + Send + 'a;

  fn list_repeatable(
    &self,
  ) -> impl Future<Output = Result<Vec<RepeatableRecord>, Self::Error>> + Send + '_;

  fn list_rollbacks(
    &self,
  ) -> impl Future<Output = Result<Vec<RollbackRecord>, Self::Error>> + Send + '_;

  /// Candidates that are not currently applied, in natural version order.
  /// Rolled-back versions count as pending.
  fn pending_versions<'a>(
    &'a self,
    candidates: &'a [String],
  ) -> impl Future<Output = Result<Vec<String>, Self::Error>> + Send + 'a;
}
