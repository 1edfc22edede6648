//! Error type for `schemalog-store-sqlite`.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Why a rollback could not be started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoRollbackReason {
  NotApplied,
  AlreadyRolledBack,
  NoScript,
}

impl std::fmt::Display for NoRollbackReason {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.write_str(match self {
      Self::NotApplied => "migration was never applied",
      Self::AlreadyRolledBack => "migration is already rolled back",
      Self::NoScript => "no rollback script was stored",
    })
  }
}

#[derive(Debug, Error)]
pub enum Error {
  #[error("core error: {0}")]
  Core(#[from] schemalog_core::Error),

  #[error("database error: {0}")]
  Database(#[from] tokio_rusqlite::Error),

  #[error("date/time parse error: {0}")]
  DateParse(String),

  /// Another holder has an unexpired lock.
  #[error("migration lock held by {holder} since {acquired_at} (expires {expires_at})")]
  LockHeld {
    holder:      String,
    acquired_at: DateTime<Utc>,
    expires_at:  DateTime<Utc>,
  },

  /// The caller does not hold the lock it tried to release or needed.
  #[error(
    "migration lock not held by {holder} (current holder: {})",
    current_holder.as_deref().unwrap_or("none")
  )]
  NotHeld {
    holder:         String,
    current_holder: Option<String>,
  },

  /// A versioned migration's body changed after it was applied.
  #[error("migration {version} has changed since it was applied (recorded {recorded}, now {current})")]
  ChecksumMismatch {
    version:  String,
    recorded: String,
    current:  String,
  },

  /// The migration SQL itself failed; the SQLite error is kept verbatim.
  #[error("migration {migration} failed: {source}")]
  Execution {
    migration: String,
    #[source]
    source:    rusqlite::Error,
  },

  /// The body issued its own `COMMIT` or `ROLLBACK`, so the statements
  /// after it ran outside the migration transaction.
  #[error("migration {migration} ended the surrounding transaction; bodies must not COMMIT or ROLLBACK")]
  TransactionEnded { migration: String },

  #[error("cannot roll back migration {version}: {reason}")]
  NoRollbackAvailable {
    version: String,
    reason:  NoRollbackReason,
  },
}

impl From<rusqlite::Error> for Error {
  fn from(e: rusqlite::Error) -> Self { Self::Database(tokio_rusqlite::Error::Rusqlite(e)) }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
