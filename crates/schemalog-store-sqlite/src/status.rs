//! Read-only ledger queries. None of these take the migration lock.

use rusqlite::{Connection, OptionalExtension as _};
use schemalog_core::{
  migration::{MigrationRecord, RepeatableRecord, RollbackRecord},
  version::compare_versions,
};

use crate::{
  encode::{RawMigration, RawRepeatable, RawRollback, CHANGELOG_COLUMNS, REPEATABLE_COLUMNS},
  Result,
};

pub fn read_migration(conn: &Connection, version: &str) -> Result<Option<MigrationRecord>> {
  let raw = conn
    .query_row(
      &format!("SELECT {CHANGELOG_COLUMNS} FROM _schemalog_changelog WHERE version = ?1"),
      rusqlite::params![version],
      RawMigration::from_row,
    )
    .optional()?;
  raw.map(RawMigration::into_record).transpose()
}

pub fn list_migrations(conn: &Connection) -> Result<Vec<MigrationRecord>> {
  let mut stmt = conn.prepare(&format!("SELECT {CHANGELOG_COLUMNS} FROM _schemalog_changelog"))?;
  let raws = stmt
    .query_map([], RawMigration::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;

  let mut records = raws
    .into_iter()
    .map(RawMigration::into_record)
    .collect::<Result<Vec<_>>>()?;
  records.sort_by(|a, b| compare_versions(&a.version, &b.version));
  Ok(records)
}

/// Versions whose status is currently `applied`.
pub fn applied_versions(conn: &Connection) -> Result<Vec<String>> {
  let mut stmt =
    conn.prepare("SELECT version FROM _schemalog_changelog WHERE status = 'applied'")?;
  let versions = stmt
    .query_map([], |row| row.get(0))?
    .collect::<rusqlite::Result<Vec<String>>>()?;
  Ok(versions)
}

pub fn read_repeatable(conn: &Connection, name: &str) -> Result<Option<RepeatableRecord>> {
  let raw = conn
    .query_row(
      &format!("SELECT {REPEATABLE_COLUMNS} FROM _schemalog_repeatable WHERE name = ?1"),
      rusqlite::params![name],
      RawRepeatable::from_row,
    )
    .optional()?;
  raw.map(RawRepeatable::into_record).transpose()
}

pub fn list_repeatable(conn: &Connection) -> Result<Vec<RepeatableRecord>> {
  let mut stmt = conn.prepare(&format!(
    "SELECT {REPEATABLE_COLUMNS} FROM _schemalog_repeatable ORDER BY name"
  ))?;
  let raws = stmt
    .query_map([], RawRepeatable::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  raws.into_iter().map(RawRepeatable::into_record).collect()
}

pub fn list_rollbacks(conn: &Connection) -> Result<Vec<RollbackRecord>> {
  let mut stmt = conn.prepare(
    "SELECT id, version, rolled_back_at, rolled_back_by, execution_ms, outcome, error_message
     FROM _schemalog_rollback_log
     ORDER BY id",
  )?;
  let raws = stmt
    .query_map([], RawRollback::from_row)?
    .collect::<rusqlite::Result<Vec<_>>>()?;
  raws.into_iter().map(RawRollback::into_record).collect()
}
