//! Error types for `schemalog-core`.

use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
  /// A version, migration name or lock holder was empty.
  #[error("{0} must not be empty")]
  EmptyIdentifier(&'static str),

  #[error("invalid lock timeout: {0:?}")]
  InvalidTimeout(Duration),

  #[error("unknown migration status: {0:?}")]
  UnknownStatus(String),

  #[error("unknown rollback outcome: {0:?}")]
  UnknownOutcome(String),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Reject empty identifiers before they reach a backend.
pub fn require_identifier(kind: &'static str, value: &str) -> Result<()> {
  if value.trim().is_empty() {
    return Err(Error::EmptyIdentifier(kind));
  }
  Ok(())
}
