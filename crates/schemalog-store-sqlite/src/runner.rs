//! Transactional execution of migration bodies.
//!
//! Each operation opens one `IMMEDIATE` transaction, checks that the store's
//! principal holds the lock, decides via [`schemalog_core::plan`], runs the
//! SQL and writes the bookkeeping row. The transaction is committed only
//! after both succeed; any error drops it, which rolls everything back.

use std::time::Instant;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, TransactionBehavior};
use schemalog_core::{
  compute_checksum,
  error::require_identifier,
  migration::{
    MigrationRecord, MigrationStatus, RepeatableOutcome, RepeatableRecord, RollbackOutcome,
    VersionedOutcome,
  },
  plan::{plan_repeatable, plan_versioned, RepeatablePlan, VersionedPlan},
};
use tracing::{debug, error, info, warn};

use crate::{
  encode::{encode_dt, encode_status},
  error::NoRollbackReason,
  lock::require_held,
  status::{read_migration, read_repeatable},
  Error, Result,
};

fn elapsed_ms(started: Instant) -> i64 {
  i64::try_from(started.elapsed().as_millis()).unwrap_or(i64::MAX)
}

fn execute_body(conn: &Connection, migration: &str, sql: &str) -> Result<i64> {
  let started = Instant::now();
  conn.execute_batch(sql).map_err(|source| {
    error!(migration, error = %source, "migration SQL failed");
    Error::Execution { migration: migration.to_owned(), source }
  })?;
  if conn.is_autocommit() {
    error!(migration, "migration SQL ended the runner's transaction");
    return Err(Error::TransactionEnded { migration: migration.to_owned() });
  }
  Ok(elapsed_ms(started))
}

// ─── Versioned ───────────────────────────────────────────────────────────────

pub fn run_versioned(
  conn:         &mut Connection,
  principal:    &str,
  version:      &str,
  description:  &str,
  sql:          &str,
  rollback_sql: Option<&str>,
) -> Result<VersionedOutcome> {
  require_identifier("migration version", version)?;
  let checksum = compute_checksum(sql);

  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
  let now = Utc::now();
  require_held(&tx, principal, now)?;

  let existing = read_migration(&tx, version)?;
  match (plan_versioned(existing.as_ref(), &checksum), existing) {
    (VersionedPlan::Skip, Some(record)) => {
      debug!(version, "migration already applied");
      return Ok(VersionedOutcome::AlreadyApplied(record));
    }
    (VersionedPlan::Drift { recorded }, _) => {
      error!(version, %recorded, current = %checksum, "applied migration has changed");
      return Err(Error::ChecksumMismatch {
        version: version.to_owned(),
        recorded,
        current: checksum,
      });
    }
    _ => {}
  }

  let execution_ms = execute_body(&tx, version, sql)?;

  let record = MigrationRecord {
    version:        version.to_owned(),
    description:    description.to_owned(),
    checksum,
    applied_at:     now,
    applied_by:     principal.to_owned(),
    execution_ms,
    rollback_sql:   rollback_sql.map(str::to_owned),
    status:         MigrationStatus::Applied,
    rolled_back_at: None,
  };

  // A rolled-back version being applied again replaces its row.
  tx.execute(
    "INSERT INTO _schemalog_changelog (
       version, description, checksum, applied_at, applied_by,
       execution_ms, rollback_sql, status, rolled_back_at
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, NULL)
     ON CONFLICT (version) DO UPDATE SET
       description    = excluded.description,
       checksum       = excluded.checksum,
       applied_at     = excluded.applied_at,
       applied_by     = excluded.applied_by,
       execution_ms   = excluded.execution_ms,
       rollback_sql   = excluded.rollback_sql,
       status         = excluded.status,
       rolled_back_at = NULL",
    rusqlite::params![
      record.version,
      record.description,
      record.checksum,
      encode_dt(record.applied_at),
      record.applied_by,
      record.execution_ms,
      record.rollback_sql,
      encode_status(record.status),
    ],
  )?;
  tx.commit()?;

  info!(version, description, execution_ms, "applied migration");
  Ok(VersionedOutcome::Applied(record))
}

// ─── Repeatable ──────────────────────────────────────────────────────────────

pub fn run_repeatable(
  conn:        &mut Connection,
  principal:   &str,
  name:        &str,
  description: &str,
  sql:         &str,
) -> Result<RepeatableOutcome> {
  require_identifier("repeatable migration name", name)?;
  let checksum = compute_checksum(sql);

  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
  let now = Utc::now();
  require_held(&tx, principal, now)?;

  let existing = read_repeatable(&tx, name)?;
  if let (RepeatablePlan::Unchanged, Some(record)) =
    (plan_repeatable(existing.as_ref(), &checksum), existing.as_ref())
  {
    debug!(name, "repeatable migration unchanged");
    return Ok(RepeatableOutcome::Unchanged(record.clone()));
  }

  let execution_ms = execute_body(&tx, name, sql)?;

  let record = RepeatableRecord {
    name: name.to_owned(),
    description: description.to_owned(),
    checksum,
    applied_at: now,
    applied_by: principal.to_owned(),
    execution_ms,
    run_count: existing.map_or(1, |r| r.run_count + 1),
  };

  tx.execute(
    "INSERT INTO _schemalog_repeatable (
       name, description, checksum, applied_at, applied_by, execution_ms, run_count
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
     ON CONFLICT (name) DO UPDATE SET
       description  = excluded.description,
       checksum     = excluded.checksum,
       applied_at   = excluded.applied_at,
       applied_by   = excluded.applied_by,
       execution_ms = excluded.execution_ms,
       run_count    = excluded.run_count",
    rusqlite::params![
      record.name,
      record.description,
      record.checksum,
      encode_dt(record.applied_at),
      record.applied_by,
      record.execution_ms,
      record.run_count,
    ],
  )?;
  tx.commit()?;

  info!(name, execution_ms, run_count = record.run_count, "applied repeatable migration");
  Ok(RepeatableOutcome::Applied(record))
}

// ─── Rollback ────────────────────────────────────────────────────────────────

fn append_rollback_log(
  conn:         &Connection,
  version:      &str,
  principal:    &str,
  at:           DateTime<Utc>,
  execution_ms: Option<i64>,
  outcome:      &RollbackOutcome,
) -> Result<()> {
  let (word, message) = match outcome {
    RollbackOutcome::Succeeded => ("succeeded", None),
    RollbackOutcome::Failed { error } => ("failed", Some(error.as_str())),
  };
  conn.execute(
    "INSERT INTO _schemalog_rollback_log (
       version, rolled_back_at, rolled_back_by, execution_ms, outcome, error_message
     ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    rusqlite::params![version, encode_dt(at), principal, execution_ms, word, message],
  )?;
  Ok(())
}

pub fn rollback(conn: &mut Connection, principal: &str, version: &str) -> Result<MigrationRecord> {
  require_identifier("migration version", version)?;

  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
  let now = Utc::now();
  require_held(&tx, principal, now)?;

  let unavailable = |reason| Error::NoRollbackAvailable { version: version.to_owned(), reason };
  let (record, script) = match read_migration(&tx, version)? {
    None => return Err(unavailable(NoRollbackReason::NotApplied)),
    Some(r) if r.status == MigrationStatus::RolledBack => {
      return Err(unavailable(NoRollbackReason::AlreadyRolledBack));
    }
    Some(r) => match r.rollback_sql.clone() {
      Some(script) => (r, script),
      None => return Err(unavailable(NoRollbackReason::NoScript)),
    },
  };

  let result = execute_body(&tx, version, &script);
  let execution_ms = match result {
    Ok(ms) => ms,
    Err(err) => {
      // Abort the rollback first, then record the attempt on its own.
      drop(tx);
      let outcome = RollbackOutcome::Failed { error: err.to_string() };
      if let Err(log_err) = append_rollback_log(conn, version, principal, now, None, &outcome) {
        warn!(version, error = %log_err, "could not record failed rollback");
      }
      return Err(err);
    }
  };

  tx.execute(
    "UPDATE _schemalog_changelog
     SET status = ?1, rolled_back_at = ?2
     WHERE version = ?3",
    rusqlite::params![encode_status(MigrationStatus::RolledBack), encode_dt(now), version],
  )?;
  append_rollback_log(&tx, version, principal, now, Some(execution_ms), &RollbackOutcome::Succeeded)?;
  tx.commit()?;

  info!(version, execution_ms, "rolled back migration");
  Ok(MigrationRecord {
    status: MigrationStatus::RolledBack,
    rolled_back_at: Some(now),
    ..record
  })
}
