//! Lock state — the single global mutual-exclusion record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The holder of the migration lock, as stored in the singleton lock row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockState {
  pub holder:      String,
  pub acquired_at: DateTime<Utc>,
  pub expires_at:  DateTime<Utc>,
}

impl LockState {
  /// A lock is stale once `now` reaches `expires_at`; a stale lock may be
  /// reclaimed by any other holder.
  pub fn is_expired(&self, now: DateTime<Utc>) -> bool { now >= self.expires_at }

  pub fn is_held_by(&self, holder: &str, now: DateTime<Utc>) -> bool {
    self.holder == holder && !self.is_expired(now)
  }
}

/// How a successful `acquire_lock` obtained the lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LockAcquisition {
  /// No lock existed.
  Acquired(LockState),
  /// The caller already held the lock; its expiry was pushed out.
  Renewed(LockState),
  /// Another holder's lock had expired and was taken over.
  Reclaimed {
    previous: LockState,
    current:  LockState,
  },
}

impl LockAcquisition {
  pub fn state(&self) -> &LockState {
    match self {
      Self::Acquired(s) | Self::Renewed(s) => s,
      Self::Reclaimed { current, .. } => current,
    }
  }
}
