//! Run decisions — whether a migration body must be executed.
//!
//! These functions look only at the existing ledger record and the checksum
//! of the supplied body. Backends call them inside the same transaction that
//! later executes the SQL, so the decision and the write cannot interleave
//! with another runner.

use crate::migration::{MigrationRecord, MigrationStatus, RepeatableRecord};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionedPlan {
  /// Never applied, or rolled back: run the SQL and record it.
  Execute,
  /// Applied with an identical body: nothing to do.
  Skip,
  /// Applied, but the body has changed since. Never re-run.
  Drift { recorded: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RepeatablePlan {
  Execute,
  Unchanged,
}

pub fn plan_versioned(existing: Option<&MigrationRecord>, checksum: &str) -> VersionedPlan {
  match existing {
    None => VersionedPlan::Execute,
    Some(r) if r.status == MigrationStatus::RolledBack => VersionedPlan::Execute,
    Some(r) if r.checksum == checksum => VersionedPlan::Skip,
    Some(r) => VersionedPlan::Drift { recorded: r.checksum.clone() },
  }
}

pub fn plan_repeatable(existing: Option<&RepeatableRecord>, checksum: &str) -> RepeatablePlan {
  match existing {
    Some(r) if r.checksum == checksum => RepeatablePlan::Unchanged,
    _ => RepeatablePlan::Execute,
  }
}
