//! The global migration lock.
//!
//! The lock is the single row of `_schemalog_lock`. Every state change runs
//! inside a `BEGIN IMMEDIATE` transaction: SQLite grants the write lock to
//! one connection at a time, so two acquirers racing on an unlocked database
//! see each other's row and exactly one of them wins.
//!
//! Under WAL a plain read goes through while another connection is writing.
//! `acquire` reads the row that way first, so a second deployer arriving in
//! the middle of a long migration is told who holds the lock instead of
//! waiting out the busy timeout.

use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{Connection, ErrorCode, OptionalExtension as _, Transaction, TransactionBehavior};
use schemalog_core::{
  error::require_identifier,
  lock::{LockAcquisition, LockState},
};
use tracing::{debug, info, warn};

use crate::{
  encode::{encode_dt, RawLock},
  Error, Result,
};

pub fn read_lock(conn: &Connection) -> Result<Option<LockState>> {
  let raw = conn
    .query_row(
      "SELECT holder, acquired_at, expires_at FROM _schemalog_lock WHERE id = 1",
      [],
      |row| {
        Ok(RawLock {
          holder:      row.get(0)?,
          acquired_at: row.get(1)?,
          expires_at:  row.get(2)?,
        })
      },
    )
    .optional()?;
  raw.map(RawLock::into_state).transpose()
}

fn write_lock(conn: &Connection, state: &LockState) -> Result<()> {
  conn.execute(
    "INSERT INTO _schemalog_lock (id, holder, acquired_at, expires_at)
     VALUES (1, ?1, ?2, ?3)
     ON CONFLICT (id) DO UPDATE SET
       holder      = excluded.holder,
       acquired_at = excluded.acquired_at,
       expires_at  = excluded.expires_at",
    rusqlite::params![
      state.holder,
      encode_dt(state.acquired_at),
      encode_dt(state.expires_at),
    ],
  )?;
  Ok(())
}

fn expiry(now: DateTime<Utc>, timeout: Duration) -> Result<DateTime<Utc>> {
  chrono::Duration::from_std(timeout)
    .ok()
    .filter(|ttl| *ttl > chrono::Duration::zero())
    .and_then(|ttl| now.checked_add_signed(ttl))
    .ok_or_else(|| schemalog_core::Error::InvalidTimeout(timeout).into())
}

fn lock_held(current: LockState) -> Error {
  Error::LockHeld {
    holder:      current.holder,
    acquired_at: current.acquired_at,
    expires_at:  current.expires_at,
  }
}

/// The lock row, if another holder has it and it has not expired.
fn held_by_other(conn: &Connection, holder: &str) -> Result<Option<LockState>> {
  let now = Utc::now();
  Ok(read_lock(conn)?.filter(|s| s.holder != holder && !s.is_expired(now)))
}

fn is_busy(e: &rusqlite::Error) -> bool {
  matches!(e.sqlite_error_code(), Some(ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked))
}

pub fn acquire(conn: &mut Connection, holder: &str, timeout: Duration) -> Result<LockAcquisition> {
  require_identifier("lock holder", holder)?;

  if let Some(current) = held_by_other(conn, holder)? {
    debug!(holder, current_holder = %current.holder, "migration lock is held");
    return Err(lock_held(current));
  }

  let begun = Transaction::new_unchecked(conn, TransactionBehavior::Immediate);
  let tx = match begun {
    Ok(tx) => tx,
    Err(e) if is_busy(&e) => {
      return Err(match held_by_other(conn, holder)? {
        Some(current) => lock_held(current),
        None => e.into(),
      });
    }
    Err(e) => return Err(e.into()),
  };
  let now = Utc::now();
  let expires_at = expiry(now, timeout)?;

  let acquisition = match read_lock(&tx)? {
    None => {
      let state = LockState { holder: holder.to_owned(), acquired_at: now, expires_at };
      write_lock(&tx, &state)?;
      info!(holder, %expires_at, "migration lock acquired");
      LockAcquisition::Acquired(state)
    }
    Some(current) if current.holder == holder => {
      let acquired_at = if current.is_expired(now) { now } else { current.acquired_at };
      let state = LockState { holder: holder.to_owned(), acquired_at, expires_at };
      write_lock(&tx, &state)?;
      debug!(holder, %expires_at, "migration lock renewed");
      LockAcquisition::Renewed(state)
    }
    Some(current) if current.is_expired(now) => {
      let state = LockState { holder: holder.to_owned(), acquired_at: now, expires_at };
      write_lock(&tx, &state)?;
      warn!(
        holder,
        previous_holder = %current.holder,
        previous_expired_at = %current.expires_at,
        "reclaimed expired migration lock"
      );
      LockAcquisition::Reclaimed { previous: current, current: state }
    }
    Some(current) => return Err(lock_held(current)),
  };

  tx.commit()?;
  Ok(acquisition)
}

pub fn release(conn: &mut Connection, holder: &str) -> Result<()> {
  require_identifier("lock holder", holder)?;

  let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
  match read_lock(&tx)? {
    Some(current) if current.holder == holder => {
      tx.execute("DELETE FROM _schemalog_lock WHERE id = 1", [])?;
      tx.commit()?;
      info!(holder, "migration lock released");
      Ok(())
    }
    current => Err(Error::NotHeld {
      holder:         holder.to_owned(),
      current_holder: current.map(|s| s.holder),
    }),
  }
}

/// Fail unless `holder` has an unexpired lock. Call inside the transaction
/// that performs the guarded work.
pub fn require_held(conn: &Connection, holder: &str, now: DateTime<Utc>) -> Result<()> {
  match read_lock(conn)? {
    Some(state) if state.is_held_by(holder, now) => Ok(()),
    other => Err(Error::NotHeld {
      holder:         holder.to_owned(),
      current_holder: other.filter(|s| !s.is_expired(now)).map(|s| s.holder),
    }),
  }
}

pub fn is_locked(conn: &Connection) -> Result<bool> {
  let now = Utc::now();
  Ok(read_lock(conn)?.is_some_and(|s| !s.is_expired(now)))
}
