//! Encoding and decoding helpers between the core record types and the
//! plain-text representations stored in SQLite columns.
//!
//! Timestamps are stored as RFC 3339 strings; statuses and outcomes as
//! lowercase snake_case words.

use chrono::{DateTime, Utc};
use schemalog_core::{
  lock::LockState,
  migration::{MigrationRecord, MigrationStatus, RepeatableRecord, RollbackOutcome, RollbackRecord},
};

use crate::{Error, Result};

// ─── DateTime<Utc>
// ────────────────────────────────────────────────────────────

pub fn encode_dt(dt: DateTime<Utc>) -> String { dt.to_rfc3339() }

pub fn decode_dt(s: &str) -> Result<DateTime<Utc>> {
  DateTime::parse_from_rfc3339(s)
    .map(|dt| dt.with_timezone(&Utc))
    .map_err(|e| Error::DateParse(e.to_string()))
}

// ─── MigrationStatus
// ──────────────────────────────────────────────────────────

pub fn encode_status(s: MigrationStatus) -> &'static str {
  match s {
    MigrationStatus::Applied => "applied",
    MigrationStatus::RolledBack => "rolled_back",
  }
}

pub fn decode_status(s: &str) -> Result<MigrationStatus> {
  match s {
    "applied" => Ok(MigrationStatus::Applied),
    "rolled_back" => Ok(MigrationStatus::RolledBack),
    other => Err(schemalog_core::Error::UnknownStatus(other.to_owned()).into()),
  }
}

// ─── Row types ───────────────────────────────────────────────────────────────

pub const CHANGELOG_COLUMNS: &str = "version, description, checksum, applied_at, applied_by,
   execution_ms, rollback_sql, status, rolled_back_at";

/// Raw values read directly from a `_schemalog_changelog` row.
pub struct RawMigration {
  pub version:        String,
  pub description:    String,
  pub checksum:       String,
  pub applied_at:     String,
  pub applied_by:     String,
  pub execution_ms:   i64,
  pub rollback_sql:   Option<String>,
  pub status:         String,
  pub rolled_back_at: Option<String>,
}

impl RawMigration {
  /// Map a row selected with [`CHANGELOG_COLUMNS`].
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      version:        row.get(0)?,
      description:    row.get(1)?,
      checksum:       row.get(2)?,
      applied_at:     row.get(3)?,
      applied_by:     row.get(4)?,
      execution_ms:   row.get(5)?,
      rollback_sql:   row.get(6)?,
      status:         row.get(7)?,
      rolled_back_at: row.get(8)?,
    })
  }

  pub fn into_record(self) -> Result<MigrationRecord> {
    Ok(MigrationRecord {
      version:        self.version,
      description:    self.description,
      checksum:       self.checksum,
      applied_at:     decode_dt(&self.applied_at)?,
      applied_by:     self.applied_by,
      execution_ms:   self.execution_ms,
      rollback_sql:   self.rollback_sql,
      status:         decode_status(&self.status)?,
      rolled_back_at: self.rolled_back_at.as_deref().map(decode_dt).transpose()?,
    })
  }
}

pub const REPEATABLE_COLUMNS: &str =
  "name, description, checksum, applied_at, applied_by, execution_ms, run_count";

/// Raw values read directly from a `_schemalog_repeatable` row.
pub struct RawRepeatable {
  pub name:         String,
  pub description:  String,
  pub checksum:     String,
  pub applied_at:   String,
  pub applied_by:   String,
  pub execution_ms: i64,
  pub run_count:    i64,
}

impl RawRepeatable {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      name:         row.get(0)?,
      description:  row.get(1)?,
      checksum:     row.get(2)?,
      applied_at:   row.get(3)?,
      applied_by:   row.get(4)?,
      execution_ms: row.get(5)?,
      run_count:    row.get(6)?,
    })
  }

  pub fn into_record(self) -> Result<RepeatableRecord> {
    Ok(RepeatableRecord {
      name:         self.name,
      description:  self.description,
      checksum:     self.checksum,
      applied_at:   decode_dt(&self.applied_at)?,
      applied_by:   self.applied_by,
      execution_ms: self.execution_ms,
      run_count:    self.run_count,
    })
  }
}

/// Raw values read directly from a `_schemalog_rollback_log` row.
pub struct RawRollback {
  pub id:             i64,
  pub version:        String,
  pub rolled_back_at: String,
  pub rolled_back_by: String,
  pub execution_ms:   Option<i64>,
  pub outcome:        String,
  pub error_message:  Option<String>,
}

impl RawRollback {
  pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
    Ok(Self {
      id:             row.get(0)?,
      version:        row.get(1)?,
      rolled_back_at: row.get(2)?,
      rolled_back_by: row.get(3)?,
      execution_ms:   row.get(4)?,
      outcome:        row.get(5)?,
      error_message:  row.get(6)?,
    })
  }

  pub fn into_record(self) -> Result<RollbackRecord> {
    let outcome = match self.outcome.as_str() {
      "succeeded" => RollbackOutcome::Succeeded,
      "failed" => RollbackOutcome::Failed {
        error: self.error_message.unwrap_or_default(),
      },
      other => return Err(schemalog_core::Error::UnknownOutcome(other.to_owned()).into()),
    };
    Ok(RollbackRecord {
      id: self.id,
      version: self.version,
      rolled_back_at: decode_dt(&self.rolled_back_at)?,
      rolled_back_by: self.rolled_back_by,
      execution_ms: self.execution_ms,
      outcome,
    })
  }
}

/// Raw values read directly from the `_schemalog_lock` row.
pub struct RawLock {
  pub holder:      String,
  pub acquired_at: String,
  pub expires_at:  String,
}

impl RawLock {
  pub fn into_state(self) -> Result<LockState> {
    Ok(LockState {
      holder:      self.holder,
      acquired_at: decode_dt(&self.acquired_at)?,
      expires_at:  decode_dt(&self.expires_at)?,
    })
  }
}
