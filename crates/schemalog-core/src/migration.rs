//! Changelog records — what the ledger remembers about each migration.
//!
//! Versioned migrations run once and are kept forever as a
//! [`MigrationRecord`]. Repeatable migrations keep only their latest state in
//! a [`RepeatableRecord`]. Rollbacks are appended to a separate log of
//! [`RollbackRecord`]s.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ─── Versioned ───────────────────────────────────────────────────────────────

/// Lifecycle of a versioned migration: `absent → applied → rolled_back`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MigrationStatus {
  Applied,
  RolledBack,
}

impl MigrationStatus {
  pub fn is_applied(self) -> bool { matches!(self, Self::Applied) }
}

/// One row of the versioned changelog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
  pub version:        String,
  pub description:    String,
  /// Fingerprint of the SQL body when it was applied. Never rewritten while
  /// the record is [`MigrationStatus::Applied`].
  pub checksum:       String,
  pub applied_at:     DateTime<Utc>,
  pub applied_by:     String,
  pub execution_ms:   i64,
  pub rollback_sql:   Option<String>,
  pub status:         MigrationStatus,
  pub rolled_back_at: Option<DateTime<Utc>>,
}

impl MigrationRecord {
  pub fn has_rollback(&self) -> bool { self.rollback_sql.is_some() }
}

// ─── Repeatable ──────────────────────────────────────────────────────────────

/// Current state of a repeatable migration (view, function, ...).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepeatableRecord {
  pub name:         String,
  pub description:  String,
  pub checksum:     String,
  /// When the body was last (re-)applied.
  pub applied_at:   DateTime<Utc>,
  pub applied_by:   String,
  pub execution_ms: i64,
  /// Number of successful applications, including the first.
  pub run_count:    i64,
}

// ─── Rollbacks ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RollbackOutcome {
  Succeeded,
  Failed { error: String },
}

impl RollbackOutcome {
  pub fn is_success(&self) -> bool { matches!(self, Self::Succeeded) }
}

/// Append-only audit entry written for every rollback attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackRecord {
  pub id:             i64,
  pub version:        String,
  pub rolled_back_at: DateTime<Utc>,
  pub rolled_back_by: String,
  /// `None` when the script failed before completing.
  pub execution_ms:   Option<i64>,
  #[serde(flatten)]
  pub outcome:        RollbackOutcome,
}

// ─── Run outcomes ────────────────────────────────────────────────────────────

/// Result of a successful `run_versioned` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionedOutcome {
  /// The SQL was executed and a new record written.
  Applied(MigrationRecord),
  /// The version was already applied with the same checksum; nothing ran.
  AlreadyApplied(MigrationRecord),
}

impl VersionedOutcome {
  pub fn was_executed(&self) -> bool { matches!(self, Self::Applied(_)) }

  pub fn record(&self) -> &MigrationRecord {
    match self {
      Self::Applied(r) | Self::AlreadyApplied(r) => r,
    }
  }
}

/// Result of a successful `run_repeatable` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepeatableOutcome {
  Applied(RepeatableRecord),
  Unchanged(RepeatableRecord),
}

impl RepeatableOutcome {
  pub fn was_executed(&self) -> bool { matches!(self, Self::Applied(_)) }

  pub fn record(&self) -> &RepeatableRecord {
    match self {
      Self::Applied(r) | Self::Unchanged(r) => r,
    }
  }
}
