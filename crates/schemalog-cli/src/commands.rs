//! Command implementations, written against any [`MigrationStore`].
//!
//! Mutating commands bracket their work with `acquire_lock` /
//! `release_lock` on the store's principal and always try to release,
//! even when a migration fails.

use std::{future::Future, time::Duration};

use anyhow::{Context as _, bail};
use schemalog_core::{
  compute_checksum,
  lock::{LockAcquisition, LockState},
  migration::{MigrationRecord, RepeatableRecord, RollbackRecord},
  store::MigrationStore,
};
use serde::Serialize;
use tracing::{info, warn};

use crate::discover::MigrationSet;

// ─── Locking ─────────────────────────────────────────────────────────────────

/// Run `work` while holding the migration lock as the store's principal.
async fn with_lock<S, T, F, Fut>(store: &S, timeout: Duration, work: F) -> anyhow::Result<T>
where
  S: MigrationStore,
  F: FnOnce() -> Fut,
  Fut: Future<Output = anyhow::Result<T>>,
{
  let holder = store.principal();
  let acquisition = store
    .acquire_lock(holder, timeout)
    .await
    .context("could not acquire the migration lock")?;
  if let LockAcquisition::Reclaimed { previous, .. } = &acquisition {
    warn!(previous = %previous.holder, "took over an expired migration lock");
  }

  let result = work().await;

  match (result, store.release_lock(holder).await) {
    (Ok(value), Ok(())) => Ok(value),
    (Ok(_), Err(e)) => Err(e).context("could not release the migration lock"),
    (Err(e), Ok(())) => Err(e),
    (Err(e), Err(release)) => {
      warn!(error = %release, "could not release the migration lock after a failure");
      Err(e)
    }
  }
}

// ─── migrate ─────────────────────────────────────────────────────────────────

#[derive(Debug, Default, Serialize)]
pub struct MigrateReport {
  pub applied:              Vec<String>,
  pub already_applied:      Vec<String>,
  pub repeatable_applied:   Vec<String>,
  pub repeatable_unchanged: Vec<String>,
}

/// Apply every versioned script in order, then every repeatable script.
/// Stops at the first failure.
pub async fn migrate<S: MigrationStore>(
  store:   &S,
  set:     &MigrationSet,
  timeout: Duration,
) -> anyhow::Result<MigrateReport> {
  with_lock(store, timeout, move || async move {
    let mut report = MigrateReport::default();

    for script in &set.versioned {
      let outcome = store
        .run_versioned(
          &script.version,
          &script.description,
          &script.sql,
          script.rollback_sql.as_deref(),
        )
        .await
        .with_context(|| format!("while running {}", script.path.display()))?;
      if outcome.was_executed() {
        report.applied.push(script.version.clone());
      } else {
        report.already_applied.push(script.version.clone());
      }
    }

    for script in &set.repeatable {
      let outcome = store
        .run_repeatable(&script.name, &script.description, &script.sql)
        .await
        .with_context(|| format!("while running {}", script.path.display()))?;
      if outcome.was_executed() {
        report.repeatable_applied.push(script.name.clone());
      } else {
        report.repeatable_unchanged.push(script.name.clone());
      }
    }

    info!(
      applied = report.applied.len(),
      repeatable = report.repeatable_applied.len(),
      "migration run finished"
    );
    anyhow::Ok(report)
  })
  .await
}

// ─── rollback ────────────────────────────────────────────────────────────────

pub async fn rollback<S: MigrationStore>(
  store:   &S,
  version: &str,
  timeout: Duration,
) -> anyhow::Result<MigrationRecord> {
  with_lock(store, timeout, move || async move {
    store
      .rollback(version)
      .await
      .with_context(|| format!("rollback of {version} failed"))
  })
  .await
}

// ─── status / pending ────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
pub struct StatusReport {
  pub applied:    Vec<MigrationRecord>,
  pub repeatable: Vec<RepeatableRecord>,
  pub rollbacks:  Vec<RollbackRecord>,
  pub lock:       Option<LockState>,
  pub locked:     bool,
}

pub async fn status<S: MigrationStore>(store: &S) -> anyhow::Result<StatusReport> {
  Ok(StatusReport {
    applied:    store.list_applied().await?,
    repeatable: store.list_repeatable().await?,
    rollbacks:  store.list_rollbacks().await?,
    lock:       store.lock_holder().await?,
    locked:     store.is_locked().await?,
  })
}

pub async fn pending<S: MigrationStore>(store: &S, set: &MigrationSet) -> anyhow::Result<Vec<String>> {
  Ok(store.pending_versions(&set.versions()).await?)
}

// ─── verify ──────────────────────────────────────────────────────────────────

#[derive(Debug, PartialEq, Eq, Serialize)]
pub struct Drift {
  pub version:  String,
  pub recorded: String,
  pub current:  String,
}

#[derive(Debug, Default, Serialize)]
pub struct VerifyReport {
  /// Applied versions whose script changed on disk.
  pub drifted:         Vec<Drift>,
  /// Applied versions with no script on disk.
  pub missing_on_disk: Vec<String>,
}

impl VerifyReport {
  pub fn is_clean(&self) -> bool { self.drifted.is_empty() && self.missing_on_disk.is_empty() }
}

/// Compare every applied migration with its script on disk. Read-only.
pub async fn verify<S: MigrationStore>(store: &S, set: &MigrationSet) -> anyhow::Result<VerifyReport> {
  let mut report = VerifyReport::default();
  for record in store.list_applied().await? {
    if !record.status.is_applied() {
      continue;
    }
    match set.get(&record.version) {
      None => report.missing_on_disk.push(record.version),
      Some(script) => {
        let current = compute_checksum(&script.sql);
        if current != record.checksum {
          report.drifted.push(Drift {
            version: record.version,
            recorded: record.checksum,
            current,
          });
        }
      }
    }
  }
  Ok(report)
}

// ─── lock / unlock ───────────────────────────────────────────────────────────

pub async fn lock<S: MigrationStore>(store: &S, timeout: Duration) -> anyhow::Result<LockState> {
  let acquisition = store.acquire_lock(store.principal(), timeout).await?;
  Ok(acquisition.state().clone())
}

pub async fn unlock<S: MigrationStore>(store: &S) -> anyhow::Result<()> {
  if store.lock_holder().await?.is_none() {
    bail!("the migration lock is not held");
  }
  store.release_lock(store.principal()).await?;
  Ok(())
}
