//! `schemalog` — apply and track SQL migrations against a SQLite database.
//!
//! # Usage
//!
//! ```
//! schemalog --database app.db migrate
//! schemalog --config schemalog.toml status --json
//! SCHEMALOG_HOLDER=deploy-42 schemalog rollback 0007
//! ```

mod commands;
mod config;
mod discover;

use std::{path::PathBuf, process::ExitCode, time::Duration};

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use schemalog_core::migration::{MigrationStatus, RollbackOutcome};
use schemalog_store_sqlite::SqliteStore;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use crate::{
  commands::StatusReport,
  config::{Overrides, Settings},
  discover::discover,
};

// ─── CLI args ─────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "schemalog", version, about = "Versioned and repeatable SQL migrations with a global lock")]
struct Cli {
  /// Path to the TOML configuration file.
  #[arg(short, long, default_value = "schemalog.toml")]
  config: PathBuf,

  /// SQLite database file (overrides `database`).
  #[arg(long)]
  database: Option<PathBuf>,

  /// Directory holding V/U/R migration scripts (overrides `migrations_dir`).
  #[arg(long)]
  migrations_dir: Option<PathBuf>,

  /// Lock holder and `applied_by` identity (overrides `holder`).
  #[arg(long)]
  holder: Option<String>,

  #[command(subcommand)]
  command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
  /// Apply pending versioned migrations, then changed repeatable ones.
  Migrate,
  /// Show applied migrations, repeatables, rollbacks and the lock.
  Status {
    /// Print machine-readable JSON.
    #[arg(long)]
    json: bool,
  },
  /// List versions on disk that are not applied.
  Pending,
  /// Check applied migrations against their scripts on disk.
  Verify,
  /// Run the stored rollback script of a version.
  Rollback { version: String },
  /// Take the migration lock and keep it until `unlock` or expiry. Needs an
  /// explicit `--holder`.
  Lock {
    /// Lock timeout in seconds (defaults to `lock_timeout_secs`).
    #[arg(long)]
    timeout_secs: Option<u64>,
  },
  /// Release a lock taken with `lock` by the same `--holder`.
  Unlock,
}

// ─── Entry point ──────────────────────────────────────────────────────────────

#[tokio::main]
async fn main() -> anyhow::Result<ExitCode> {
  tracing_subscriber::fmt()
    .with_env_filter(
      EnvFilter::builder()
        .with_default_directive(LevelFilter::INFO.into())
        .from_env_lossy(),
    )
    .with_writer(std::io::stderr)
    .init();

  let cli = Cli::parse();

  let settings = Settings::load(&cli.config, Overrides {
    database:       cli.database,
    migrations_dir: cli.migrations_dir,
    holder:         cli.holder,
  })?;
  let timeout = Duration::from_secs(settings.lock_timeout_secs);

  let principal = match cli.command {
    Command::Lock { .. } | Command::Unlock => settings.explicit_holder()?.to_owned(),
    _ => settings.holder(),
  };

  let store = SqliteStore::open(&settings.database, principal)
    .await
    .with_context(|| format!("failed to open database at {:?}", settings.database))?;

  let load_scripts = || {
    discover(&settings.migrations_dir)
      .with_context(|| format!("failed to load migrations from {:?}", settings.migrations_dir))
  };

  match cli.command {
    Command::Migrate => {
      let set = load_scripts()?;
      let report = commands::migrate(&store, &set, timeout).await?;
      for v in &report.applied {
        println!("applied     {v}");
      }
      for name in &report.repeatable_applied {
        println!("applied     R {name}");
      }
      println!(
        "{} applied, {} already applied, {} repeatable applied, {} repeatable unchanged",
        report.applied.len(),
        report.already_applied.len(),
        report.repeatable_applied.len(),
        report.repeatable_unchanged.len(),
      );
    }
    Command::Status { json } => {
      let report = commands::status(&store).await?;
      if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
      } else {
        print_status(&report);
      }
    }
    Command::Pending => {
      let set = load_scripts()?;
      for v in commands::pending(&store, &set).await? {
        match set.get(&v) {
          Some(script) => println!("{v}\t{}", script.description),
          None => println!("{v}"),
        }
      }
    }
    Command::Verify => {
      let set = load_scripts()?;
      let report = commands::verify(&store, &set).await?;
      for d in &report.drifted {
        println!("drift       {} (recorded {}, on disk {})", d.version, d.recorded, d.current);
      }
      for v in &report.missing_on_disk {
        println!("missing     {v}");
      }
      if !report.is_clean() {
        return Ok(ExitCode::FAILURE);
      }
      println!("ok");
    }
    Command::Rollback { version } => {
      let rec = commands::rollback(&store, &version, timeout).await?;
      println!("rolled back {} ({})", rec.version, rec.description);
    }
    Command::Lock { timeout_secs } => {
      let timeout = timeout_secs.map_or(timeout, Duration::from_secs);
      let state = commands::lock(&store, timeout).await?;
      println!("locked by {} until {}", state.holder, state.expires_at.to_rfc3339());
    }
    Command::Unlock => {
      commands::unlock(&store).await?;
      println!("unlocked");
    }
  }

  Ok(ExitCode::SUCCESS)
}

// ─── Output ───────────────────────────────────────────────────────────────────

fn print_status(report: &StatusReport) {
  const TS: &str = "%Y-%m-%d %H:%M:%S";

  println!("Versioned migrations:");
  if report.applied.is_empty() {
    println!("  (none)");
  }
  for m in &report.applied {
    let state = match m.status {
      MigrationStatus::Applied => "applied",
      MigrationStatus::RolledBack => "rolled back",
    };
    println!(
      "  {:<12} {:<11} {}  {:>6}ms  {}  {}",
      m.version,
      state,
      m.applied_at.format(TS),
      m.execution_ms,
      &m.checksum[..12.min(m.checksum.len())],
      m.description,
    );
  }

  println!("Repeatable migrations:");
  if report.repeatable.is_empty() {
    println!("  (none)");
  }
  for r in &report.repeatable {
    println!(
      "  {:<24} runs={:<4} {}  {}",
      r.name,
      r.run_count,
      r.applied_at.format(TS),
      &r.checksum[..12.min(r.checksum.len())],
    );
  }

  if !report.rollbacks.is_empty() {
    println!("Rollbacks:");
    for rb in &report.rollbacks {
      let outcome = match &rb.outcome {
        RollbackOutcome::Succeeded => "succeeded".to_owned(),
        RollbackOutcome::Failed { error } => format!("failed: {error}"),
      };
      println!(
        "  {:<12} {} by {}  {outcome}",
        rb.version,
        rb.rolled_back_at.format(TS),
        rb.rolled_back_by,
      );
    }
  }

  match &report.lock {
    Some(lock) if report.locked => println!(
      "Lock: held by {} since {} (expires {})",
      lock.holder,
      lock.acquired_at.format(TS),
      lock.expires_at.format(TS),
    ),
    Some(lock) => println!(
      "Lock: stale, last held by {} (expired {})",
      lock.holder,
      lock.expires_at.format(TS),
    ),
    None => println!("Lock: free"),
  }
}
