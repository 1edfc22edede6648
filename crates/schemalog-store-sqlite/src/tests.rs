//! Integration tests for `SqliteStore` against in-memory and on-disk
//! databases.

use std::time::{Duration, Instant};

use schemalog_core::{
  compute_checksum,
  lock::LockAcquisition,
  migration::{MigrationStatus, RollbackOutcome},
  store::MigrationStore,
};
use tempfile::TempDir;

use crate::{error::NoRollbackReason, Error, SqliteStore};

const MINUTE: Duration = Duration::from_secs(60);

const HITS_SQL: &str = "CREATE TABLE IF NOT EXISTS hits (n INTEGER);
INSERT INTO hits VALUES (1);";

async fn store() -> SqliteStore {
  SqliteStore::open_in_memory("deployer")
    .await
    .expect("in-memory store")
}

async fn locked_store() -> SqliteStore {
  let s = store().await;
  s.acquire_lock("deployer", MINUTE).await.unwrap();
  s
}

async fn file_store(dir: &TempDir, principal: &str) -> SqliteStore {
  SqliteStore::open(dir.path().join("ledger.db"), principal)
    .await
    .expect("file store")
}

/// A second connection holding the write lock, as a running migration does.
fn hold_write_lock(dir: &TempDir) -> rusqlite::Connection {
  let conn = rusqlite::Connection::open(dir.path().join("ledger.db")).unwrap();
  conn.execute_batch("BEGIN IMMEDIATE;").unwrap();
  conn
}

async fn hits(s: &SqliteStore) -> i64 { s.query_i64("SELECT COUNT(*) FROM hits").await.unwrap() }

async fn table_exists(s: &SqliteStore, name: &str) -> bool {
  s.query_i64(&format!(
    "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name = '{name}'"
  ))
  .await
  .unwrap()
    == 1
}

// ─── Lock ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn acquire_and_release() {
  let s = store().await;
  assert!(!s.is_locked().await.unwrap());

  let acq = s.acquire_lock("deployer", MINUTE).await.unwrap();
  assert!(matches!(acq, LockAcquisition::Acquired(_)));
  assert!(s.is_locked().await.unwrap());

  let holder = s.lock_holder().await.unwrap().unwrap();
  assert_eq!(holder.holder, "deployer");
  assert!(holder.expires_at > holder.acquired_at);

  s.release_lock("deployer").await.unwrap();
  assert!(!s.is_locked().await.unwrap());
  assert!(s.lock_holder().await.unwrap().is_none());
}

#[tokio::test]
async fn same_holder_reacquire_renews() {
  let s = store().await;
  let first = s.acquire_lock("deployer", MINUTE).await.unwrap();
  let second = s.acquire_lock("deployer", MINUTE * 2).await.unwrap();

  let state = match second {
    LockAcquisition::Renewed(state) => state,
    other => panic!("expected renewal, got {other:?}"),
  };
  assert_eq!(state.acquired_at, first.state().acquired_at);
  assert!(state.expires_at > first.state().expires_at);
}

#[tokio::test]
async fn second_holder_gets_lock_held() {
  let s = store().await;
  s.acquire_lock("A", MINUTE).await.unwrap();

  let err = s.acquire_lock("B", MINUTE).await.unwrap_err();
  assert!(matches!(err, Error::LockHeld { ref holder, .. } if holder == "A"));
  assert!(err.to_string().contains("A"));
}

#[tokio::test]
async fn release_requires_matching_holder() {
  let s = store().await;

  let err = s.release_lock("A").await.unwrap_err();
  assert!(matches!(err, Error::NotHeld { current_holder: None, .. }));

  s.acquire_lock("A", MINUTE).await.unwrap();
  let err = s.release_lock("B").await.unwrap_err();
  assert!(matches!(
    err,
    Error::NotHeld { ref holder, current_holder: Some(ref current) } if holder == "B" && current == "A"
  ));
  assert!(s.is_locked().await.unwrap());
}

#[tokio::test]
async fn expired_lock_is_reclaimed() {
  let s = store().await;
  s.acquire_lock("A", Duration::from_millis(200)).await.unwrap();
  assert!(matches!(
    s.acquire_lock("B", MINUTE).await,
    Err(Error::LockHeld { .. })
  ));

  tokio::time::sleep(Duration::from_millis(300)).await;
  assert!(!s.is_locked().await.unwrap());

  let acq = s.acquire_lock("B", MINUTE).await.unwrap();
  let (previous, current) = match acq {
    LockAcquisition::Reclaimed { previous, current } => (previous, current),
    other => panic!("expected reclaim, got {other:?}"),
  };
  assert_eq!(previous.holder, "A");
  assert_eq!(current.holder, "B");
  assert_eq!(s.lock_holder().await.unwrap().unwrap().holder, "B");
}

#[tokio::test]
async fn invalid_lock_arguments_are_rejected() {
  let s = store().await;
  assert!(matches!(
    s.acquire_lock("deployer", Duration::ZERO).await,
    Err(Error::Core(schemalog_core::Error::InvalidTimeout(_)))
  ));
  assert!(matches!(
    s.acquire_lock("  ", MINUTE).await,
    Err(Error::Core(schemalog_core::Error::EmptyIdentifier(_)))
  ));
  assert!(!s.is_locked().await.unwrap());
}

#[tokio::test]
async fn concurrent_acquire_has_one_winner() {
  let dir = tempfile::tempdir().unwrap();
  let a = file_store(&dir, "A").await;
  let b = file_store(&dir, "B").await;

  for _ in 0..10 {
    let (ra, rb) = tokio::join!(a.acquire_lock("A", MINUTE), b.acquire_lock("B", MINUTE));
    let (winner, loser) = match (ra, rb) {
      (Ok(_), Err(e)) => ("A", e),
      (Err(e), Ok(_)) => ("B", e),
      other => panic!("expected exactly one winner, got {other:?}"),
    };
    assert!(matches!(loser, Error::LockHeld { ref holder, .. } if holder == winner));
    a.release_lock(winner).await.unwrap();
  }
}

#[tokio::test]
async fn lock_held_is_reported_during_a_running_migration() {
  let dir = tempfile::tempdir().unwrap();
  let a = file_store(&dir, "A").await;
  let b = file_store(&dir, "B").await;
  let held = a.acquire_lock("A", MINUTE).await.unwrap();

  let writer = hold_write_lock(&dir);
  let started = Instant::now();
  let err = b.acquire_lock("B", MINUTE).await.unwrap_err();
  assert!(started.elapsed() < Duration::from_secs(2), "waited on the write lock");

  match err {
    Error::LockHeld { holder, acquired_at, expires_at } => {
      assert_eq!(holder, "A");
      assert_eq!(acquired_at, held.state().acquired_at);
      assert_eq!(expires_at, held.state().expires_at);
    }
    other => panic!("expected LockHeld, got {other:?}"),
  }
  writer.execute_batch("ROLLBACK;").unwrap();
}

// ─── Versioned migrations ────────────────────────────────────────────────────

#[tokio::test]
async fn versioned_migration_is_recorded() {
  let s = locked_store().await;
  let sql = "CREATE TABLE a (id INTEGER PRIMARY KEY);";

  let outcome = s.run_versioned("001", "create a", sql, None).await.unwrap();
  assert!(outcome.was_executed());

  let rec = s.get_migration("001").await.unwrap().unwrap();
  assert_eq!(rec.description, "create a");
  assert_eq!(rec.checksum, compute_checksum(sql));
  assert_eq!(rec.applied_by, "deployer");
  assert_eq!(rec.status, MigrationStatus::Applied);
  assert!(rec.rolled_back_at.is_none());
  assert!(table_exists(&s, "a").await);
}

#[tokio::test]
async fn versioned_migration_runs_once() {
  let s = locked_store().await;

  s.run_versioned("001", "hits", HITS_SQL, None).await.unwrap();
  let again = s.run_versioned("001", "hits", HITS_SQL, None).await.unwrap();

  assert!(!again.was_executed());
  assert_eq!(hits(&s).await, 1);
  assert_eq!(s.list_applied().await.unwrap().len(), 1);
}

#[tokio::test]
async fn changed_versioned_body_is_drift() {
  let s = locked_store().await;
  s.run_versioned("001", "x", HITS_SQL, None).await.unwrap();

  let changed = format!("{HITS_SQL}\nCREATE TABLE different (id INTEGER);");
  let err = s.run_versioned("001", "x", &changed, None).await.unwrap_err();

  match err {
    Error::ChecksumMismatch { version, recorded, current } => {
      assert_eq!(version, "001");
      assert_eq!(recorded, compute_checksum(HITS_SQL));
      assert_eq!(current, compute_checksum(&changed));
    }
    other => panic!("expected checksum mismatch, got {other:?}"),
  }
  assert_eq!(hits(&s).await, 1);
  assert!(!table_exists(&s, "different").await);
}

#[tokio::test]
async fn failed_migration_leaves_no_record() {
  let s = locked_store().await;
  let sql = "CREATE TABLE t (id INTEGER PRIMARY KEY);
INSERT INTO t VALUES (1);
INSERT INTO t VALUES (1);";

  let err = s.run_versioned("003", "dup", sql, None).await.unwrap_err();
  let Error::Execution { migration, source } = &err else {
    panic!("expected execution failure, got {err:?}");
  };
  assert_eq!(migration, "003");
  assert_eq!(
    source.sqlite_error_code(),
    Some(rusqlite::ErrorCode::ConstraintViolation)
  );
  assert!(err.to_string().contains("003"));

  assert!(s.get_migration("003").await.unwrap().is_none());
  assert!(!table_exists(&s, "t").await);
}

#[tokio::test]
async fn body_ending_the_transaction_is_rejected() {
  let s = locked_store().await;
  let sql = "CREATE TABLE early (id INTEGER);
COMMIT;
CREATE TABLE late (id INTEGER);";

  let err = s.run_versioned("004", "commits", sql, None).await.unwrap_err();
  assert!(matches!(err, Error::TransactionEnded { ref migration } if migration == "004"));
  assert!(s.get_migration("004").await.unwrap().is_none());

  // The connection is usable for the next migration.
  s.run_versioned("005", "hits", HITS_SQL, None).await.unwrap();
  assert_eq!(hits(&s).await, 1);
}

#[tokio::test]
async fn migrations_require_the_lock() {
  let s = store().await;

  let err = s.run_versioned("001", "hits", HITS_SQL, None).await.unwrap_err();
  assert!(matches!(err, Error::NotHeld { ref holder, .. } if holder == "deployer"));
  assert!(matches!(
    s.run_repeatable("R1", "view", "SELECT 1;").await,
    Err(Error::NotHeld { .. })
  ));
  assert!(matches!(s.rollback("001").await, Err(Error::NotHeld { .. })));

  assert!(s.get_migration("001").await.unwrap().is_none());
  assert!(!table_exists(&s, "hits").await);
}

#[tokio::test]
async fn lock_held_by_another_principal_blocks_runs() {
  let dir = tempfile::tempdir().unwrap();
  let a = file_store(&dir, "A").await;
  let b = file_store(&dir, "B").await;
  a.acquire_lock("A", MINUTE).await.unwrap();

  let err = b.run_versioned("001", "hits", HITS_SQL, None).await.unwrap_err();
  assert!(matches!(
    err,
    Error::NotHeld { ref current_holder, .. } if current_holder.as_deref() == Some("A")
  ));

  // Status reads do not need the lock.
  a.run_versioned("001", "hits", HITS_SQL, None).await.unwrap();
  let applied = b.list_applied().await.unwrap();
  assert_eq!(applied.len(), 1);
  assert_eq!(applied[0].applied_by, "A");
  assert_eq!(b.lock_holder().await.unwrap().unwrap().holder, "A");
}

#[tokio::test]
async fn expired_lock_no_longer_authorises_runs() {
  let s = store().await;
  s.acquire_lock("deployer", Duration::from_millis(100)).await.unwrap();
  tokio::time::sleep(Duration::from_millis(200)).await;

  let err = s.run_versioned("001", "hits", HITS_SQL, None).await.unwrap_err();
  assert!(matches!(err, Error::NotHeld { current_holder: None, .. }));
}

#[tokio::test]
async fn empty_version_is_rejected() {
  let s = locked_store().await;
  assert!(matches!(
    s.run_versioned("", "x", "SELECT 1;", None).await,
    Err(Error::Core(schemalog_core::Error::EmptyIdentifier(_)))
  ));
}

// ─── Repeatable migrations ───────────────────────────────────────────────────

#[tokio::test]
async fn repeatable_reruns_only_on_change() {
  let s = locked_store().await;
  let sql_a = HITS_SQL;
  let sql_b = format!("{HITS_SQL} -- edited");

  assert!(s.run_repeatable("R1", "hits", sql_a).await.unwrap().was_executed());
  assert!(!s.run_repeatable("R1", "hits", sql_a).await.unwrap().was_executed());
  assert_eq!(hits(&s).await, 1);

  let outcome = s.run_repeatable("R1", "hits", &sql_b).await.unwrap();
  assert!(outcome.was_executed());
  assert_eq!(hits(&s).await, 2);

  let recs = s.list_repeatable().await.unwrap();
  assert_eq!(recs.len(), 1);
  assert_eq!(recs[0].checksum, compute_checksum(&sql_b));
  assert_eq!(recs[0].run_count, 2);
}

#[tokio::test]
async fn failed_repeatable_keeps_previous_record() {
  let s = locked_store().await;
  s.run_repeatable("R1", "view", "CREATE VIEW v AS SELECT 1 AS one;").await.unwrap();
  let before = s.list_repeatable().await.unwrap();

  let err = s
    .run_repeatable("R1", "view", "DROP VIEW v; SELECT * FROM missing;")
    .await
    .unwrap_err();
  assert!(matches!(err, Error::Execution { ref migration, .. } if migration == "R1"));

  assert_eq!(s.list_repeatable().await.unwrap(), before);
  assert_eq!(s.query_i64("SELECT one FROM v").await.unwrap(), 1);
}

#[tokio::test]
async fn repeatables_are_listed_by_name() {
  let s = locked_store().await;
  s.run_repeatable("views", "v", "CREATE VIEW v1 AS SELECT 1;").await.unwrap();
  s.run_repeatable("functions", "f", "CREATE VIEW v2 AS SELECT 2;").await.unwrap();

  let names: Vec<String> = s
    .list_repeatable()
    .await
    .unwrap()
    .into_iter()
    .map(|r| r.name)
    .collect();
  assert_eq!(names, ["functions", "views"]);
}

// ─── Rollback ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn rollback_runs_script_once() {
  let s = locked_store().await;
  s.run_versioned("002", "y", "CREATE TABLE y (id INTEGER);", Some("DROP TABLE y;"))
    .await
    .unwrap();

  let rec = s.rollback("002").await.unwrap();
  assert_eq!(rec.status, MigrationStatus::RolledBack);
  assert!(rec.rolled_back_at.is_some());
  assert!(!table_exists(&s, "y").await);

  let stored = s.get_migration("002").await.unwrap().unwrap();
  assert_eq!(stored.status, MigrationStatus::RolledBack);

  let log = s.list_rollbacks().await.unwrap();
  assert_eq!(log.len(), 1);
  assert_eq!(log[0].version, "002");
  assert_eq!(log[0].rolled_back_by, "deployer");
  assert!(log[0].outcome.is_success());

  let err = s.rollback("002").await.unwrap_err();
  assert!(matches!(
    err,
    Error::NoRollbackAvailable { reason: NoRollbackReason::AlreadyRolledBack, .. }
  ));
}

#[tokio::test]
async fn rollback_needs_a_script_and_an_applied_version() {
  let s = locked_store().await;
  s.run_versioned("001", "x", "CREATE TABLE x (id INTEGER);", None).await.unwrap();

  assert!(matches!(
    s.rollback("001").await,
    Err(Error::NoRollbackAvailable { reason: NoRollbackReason::NoScript, .. })
  ));
  assert!(matches!(
    s.rollback("999").await,
    Err(Error::NoRollbackAvailable { reason: NoRollbackReason::NotApplied, .. })
  ));
  assert!(s.list_rollbacks().await.unwrap().is_empty());
}

#[tokio::test]
async fn failed_rollback_keeps_status_and_is_logged() {
  let s = locked_store().await;
  s.run_versioned("002", "y", "CREATE TABLE y (id INTEGER);", Some("DROP TABLE nope;"))
    .await
    .unwrap();

  let err = s.rollback("002").await.unwrap_err();
  assert!(matches!(err, Error::Execution { ref migration, .. } if migration == "002"));

  let rec = s.get_migration("002").await.unwrap().unwrap();
  assert_eq!(rec.status, MigrationStatus::Applied);
  assert!(table_exists(&s, "y").await);

  let log = s.list_rollbacks().await.unwrap();
  assert_eq!(log.len(), 1);
  assert!(matches!(&log[0].outcome, RollbackOutcome::Failed { error } if error.contains("nope")));
  assert!(log[0].execution_ms.is_none());
}

#[tokio::test]
async fn rolled_back_version_can_be_applied_again() {
  let s = locked_store().await;
  s.run_versioned("002", "y", "CREATE TABLE y (id INTEGER);", Some("DROP TABLE y;"))
    .await
    .unwrap();
  s.rollback("002").await.unwrap();

  let outcome = s
    .run_versioned("002", "y", "CREATE TABLE y (id INTEGER);", Some("DROP TABLE y;"))
    .await
    .unwrap();
  assert!(outcome.was_executed());
  assert_eq!(outcome.record().status, MigrationStatus::Applied);

  let stored = s.get_migration("002").await.unwrap().unwrap();
  assert_eq!(stored.status, MigrationStatus::Applied);
  assert!(stored.rolled_back_at.is_none());
  assert!(table_exists(&s, "y").await);
}

// ─── Status ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn applied_list_is_in_natural_version_order() {
  let s = locked_store().await;
  for v in ["10", "2", "1"] {
    s.run_versioned(v, "table", &format!("CREATE TABLE t{v} (id INTEGER);"), None).await.unwrap();
  }

  let versions: Vec<String> = s
    .list_applied()
    .await
    .unwrap()
    .into_iter()
    .map(|r| r.version)
    .collect();
  assert_eq!(versions, ["1", "2", "10"]);
}

#[tokio::test]
async fn pending_versions_skip_applied_only() {
  let s = locked_store().await;
  s.run_versioned("1", "a", "CREATE TABLE a (id INTEGER);", None).await.unwrap();
  s.run_versioned("2", "b", "CREATE TABLE b (id INTEGER);", Some("DROP TABLE b;"))
    .await
    .unwrap();
  s.rollback("2").await.unwrap();

  let candidates: Vec<String> = ["10", "3", "2", "1"].map(String::from).into();
  let pending = s.pending_versions(&candidates).await.unwrap();
  assert_eq!(pending, ["2", "3", "10"]);
}

#[tokio::test]
async fn store_opens_and_reads_during_a_running_migration() {
  let dir = tempfile::tempdir().unwrap();
  let a = file_store(&dir, "A").await;
  a.acquire_lock("A", MINUTE).await.unwrap();
  a.run_versioned("001", "hits", HITS_SQL, None).await.unwrap();

  let writer = hold_write_lock(&dir);
  let reader = file_store(&dir, "reader").await;
  assert_eq!(reader.list_applied().await.unwrap().len(), 1);
  assert!(reader.is_locked().await.unwrap());
  assert_eq!(
    reader.pending_versions(&["001".into(), "002".into()]).await.unwrap(),
    vec!["002".to_owned()]
  );
  writer.execute_batch("ROLLBACK;").unwrap();
}

#[tokio::test]
async fn ledger_survives_reopen() {
  let dir = tempfile::tempdir().unwrap();
  {
    let s = file_store(&dir, "deployer").await;
    s.acquire_lock("deployer", MINUTE).await.unwrap();
    s.run_versioned("001", "hits", HITS_SQL, None).await.unwrap();
    s.release_lock("deployer").await.unwrap();
  }

  let s = file_store(&dir, "deployer").await;
  s.acquire_lock("deployer", MINUTE).await.unwrap();
  let again = s.run_versioned("001", "hits", HITS_SQL, None).await.unwrap();
  assert!(!again.was_executed());
  assert_eq!(hits(&s).await, 1);
}
