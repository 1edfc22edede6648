//! [`SqliteStore`] — the SQLite implementation of [`MigrationStore`].

use std::{path::Path, sync::Arc, time::Duration};

use schemalog_core::{
  lock::{LockAcquisition, LockState},
  migration::{
    MigrationRecord, RepeatableOutcome, RepeatableRecord, RollbackRecord, VersionedOutcome,
  },
  store::MigrationStore,
  version,
};

use crate::{
  lock, runner,
  schema::{SCHEMA, SCHEMA_VERSION},
  status, Error, Result,
};

/// How long a connection waits for another process's write transaction
/// before giving up with `SQLITE_BUSY`.
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

// ─── Store ───────────────────────────────────────────────────────────────────

/// A migration ledger backed by a single SQLite file.
///
/// Each store acts as one principal: the identity written to `applied_by`
/// and required to hold the migration lock before any migration runs.
/// Cloning is cheap — the inner connection is reference-counted.
#[derive(Clone)]
pub struct SqliteStore {
  conn:      tokio_rusqlite::Connection,
  principal: Arc<str>,
}

impl SqliteStore {
  /// Open (or create) a ledger at `path`, creating the bookkeeping tables
  /// if they are missing.
  pub async fn open(path: impl AsRef<Path>, principal: impl Into<String>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open(path).await?;
    Self::init(conn, principal.into()).await
  }

  /// Open an in-memory ledger — useful for testing. Not shareable between
  /// stores, so lock contention needs a file-backed store.
  pub async fn open_in_memory(principal: impl Into<String>) -> Result<Self> {
    let conn = tokio_rusqlite::Connection::open_in_memory().await?;
    Self::init(conn, principal.into()).await
  }

  async fn init(conn: tokio_rusqlite::Connection, principal: String) -> Result<Self> {
    schemalog_core::error::require_identifier("principal", &principal)?;
    conn
      .call(|conn| {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        // Only an outdated ledger needs the write lock; a current one opens
        // with a read even while a migration holds a write transaction.
        let version: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
        if version < SCHEMA_VERSION {
          conn.execute_batch(SCHEMA)?;
        }
        Ok(())
      })
      .await?;
    Ok(Self { conn, principal: principal.into() })
  }

  /// Run a synchronous ledger operation on the connection thread.
  async fn with_conn<T, F>(&self, f: F) -> Result<T>
  where
    T: Send + 'static,
    F: FnOnce(&mut rusqlite::Connection) -> Result<T> + Send + 'static,
  {
    self.conn.call(move |conn| Ok(f(conn))).await?
  }
}

// ─── MigrationStore impl ─────────────────────────────────────────────────────

impl MigrationStore for SqliteStore {
  type Error = Error;

  fn principal(&self) -> &str { &self.principal }

  // ── Lock ──────────────────────────────────────────────────────────────────

  async fn acquire_lock(&self, holder: &str, timeout: Duration) -> Result<LockAcquisition> {
    let holder = holder.to_owned();
    self
      .with_conn(move |conn| lock::acquire(conn, &holder, timeout))
      .await
  }

  async fn release_lock(&self, holder: &str) -> Result<()> {
    let holder = holder.to_owned();
    self.with_conn(move |conn| lock::release(conn, &holder)).await
  }

  async fn is_locked(&self) -> Result<bool> {
    self.with_conn(|conn| lock::is_locked(conn)).await
  }

  async fn lock_holder(&self) -> Result<Option<LockState>> {
    self.with_conn(|conn| lock::read_lock(conn)).await
  }

  // ── Runner ────────────────────────────────────────────────────────────────

  async fn run_versioned(
    &self,
    version:      &str,
    description:  &str,
    sql:          &str,
    rollback_sql: Option<&str>,
  ) -> Result<VersionedOutcome> {
    let principal    = self.principal.clone();
    let version      = version.to_owned();
    let description  = description.to_owned();
    let sql          = sql.to_owned();
    let rollback_sql = rollback_sql.map(str::to_owned);

    self
      .with_conn(move |conn| {
        runner::run_versioned(
          conn,
          &principal,
          &version,
          &description,
          &sql,
          rollback_sql.as_deref(),
        )
      })
      .await
  }

  async fn run_repeatable(
    &self,
    name:        &str,
    description: &str,
    sql:         &str,
  ) -> Result<RepeatableOutcome> {
    let principal   = self.principal.clone();
    let name        = name.to_owned();
    let description = description.to_owned();
    let sql         = sql.to_owned();

    self
      .with_conn(move |conn| runner::run_repeatable(conn, &principal, &name, &description, &sql))
      .await
  }

  async fn rollback(&self, version: &str) -> Result<MigrationRecord> {
    let principal = self.principal.clone();
    let version   = version.to_owned();
    self
      .with_conn(move |conn| runner::rollback(conn, &principal, &version))
      .await
  }

  // ── Status ────────────────────────────────────────────────────────────────

  async fn list_applied(&self) -> Result<Vec<MigrationRecord>> {
    self.with_conn(|conn| status::list_migrations(conn)).await
  }

  async fn get_migration(&self, version: &str) -> Result<Option<MigrationRecord>> {
    let version = version.to_owned();
    self
      .with_conn(move |conn| status::read_migration(conn, &version))
      .await
  }

  async fn list_repeatable(&self) -> Result<Vec<RepeatableRecord>> {
    self.with_conn(|conn| status::list_repeatable(conn)).await
  }

  async fn list_rollbacks(&self) -> Result<Vec<RollbackRecord>> {
    self.with_conn(|conn| status::list_rollbacks(conn)).await
  }

  async fn pending_versions(&self, candidates: &[String]) -> Result<Vec<String>> {
    let applied = self.with_conn(|conn| status::applied_versions(conn)).await?;
    Ok(version::pending_versions(
      candidates.iter().map(String::as_str),
      applied.iter().map(String::as_str),
    ))
  }
}

#[cfg(test)]
impl SqliteStore {
  /// Evaluate a query returning a single integer, e.g. a row count.
  pub(crate) async fn query_i64(&self, sql: &str) -> Result<i64> {
    let sql = sql.to_owned();
    self
      .with_conn(move |conn| Ok(conn.query_row(&sql, [], |row| row.get(0))?))
      .await
  }
}
