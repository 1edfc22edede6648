//! SQL schema for the schemalog bookkeeping tables.
//!
//! Executed on open when `PRAGMA user_version` is behind [`SCHEMA_VERSION`].
//! All tables carry the `_schemalog_` prefix so they stay apart from the
//! application tables the migrations create.

/// Layout version written by [`SCHEMA`]. Bump both together.
pub const SCHEMA_VERSION: i32 = 1;

/// Full bookkeeping DDL; idempotent thanks to `CREATE TABLE IF NOT EXISTS`.
pub const SCHEMA: &str = "
PRAGMA journal_mode = WAL;

-- One row per versioned migration. Never deleted; status moves to
-- 'rolled_back' through an explicit rollback only.
CREATE TABLE IF NOT EXISTS _schemalog_changelog (
    version         TEXT PRIMARY KEY,
    description     TEXT NOT NULL,
    checksum        TEXT NOT NULL,   -- sha256 hex of the SQL body
    applied_at      TEXT NOT NULL,   -- RFC 3339 UTC
    applied_by      TEXT NOT NULL,
    execution_ms    INTEGER NOT NULL,
    rollback_sql    TEXT,
    status          TEXT NOT NULL DEFAULT 'applied'
                    CHECK (status IN ('applied', 'rolled_back')),
    rolled_back_at  TEXT
);

-- Latest state of each repeatable migration.
CREATE TABLE IF NOT EXISTS _schemalog_repeatable (
    name            TEXT PRIMARY KEY,
    description     TEXT NOT NULL,
    checksum        TEXT NOT NULL,
    applied_at      TEXT NOT NULL,
    applied_by      TEXT NOT NULL,
    execution_ms    INTEGER NOT NULL,
    run_count       INTEGER NOT NULL DEFAULT 1
);

-- Append-only. No UPDATE or DELETE is ever issued against this table.
CREATE TABLE IF NOT EXISTS _schemalog_rollback_log (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    version         TEXT NOT NULL,
    rolled_back_at  TEXT NOT NULL,
    rolled_back_by  TEXT NOT NULL,
    execution_ms    INTEGER,
    outcome         TEXT NOT NULL CHECK (outcome IN ('succeeded', 'failed')),
    error_message   TEXT
);

-- Singleton: at most one row, id = 1.
CREATE TABLE IF NOT EXISTS _schemalog_lock (
    id              INTEGER PRIMARY KEY CHECK (id = 1),
    holder          TEXT NOT NULL,
    acquired_at     TEXT NOT NULL,
    expires_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS _schemalog_rollback_version_idx
    ON _schemalog_rollback_log(version);

PRAGMA user_version = 1;
";
