//! Runtime configuration.
//!
//! Layered with the `config` crate: an optional TOML file, then
//! `SCHEMALOG_*` environment variables, then command-line overrides.

use std::path::{Path, PathBuf};

use anyhow::{Context as _, bail};
use serde::Deserialize;

pub const ENV_PREFIX: &str = "SCHEMALOG";

/// Settings for one `schemalog` invocation.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
  /// SQLite database holding both the application schema and the ledger.
  pub database:          PathBuf,
  #[serde(default = "default_migrations_dir")]
  pub migrations_dir:    PathBuf,
  /// Identity used as lock holder and `applied_by`. Required by `lock` and
  /// `unlock`, which span invocations.
  #[serde(default)]
  pub holder:            Option<String>,
  #[serde(default = "default_lock_timeout_secs")]
  pub lock_timeout_secs: u64,
}

/// Values given on the command line; they win over file and environment.
#[derive(Debug, Default)]
pub struct Overrides {
  pub database:       Option<PathBuf>,
  pub migrations_dir: Option<PathBuf>,
  pub holder:         Option<String>,
}

fn default_migrations_dir() -> PathBuf { PathBuf::from("migrations") }

fn default_lock_timeout_secs() -> u64 { 300 }

/// `<host>:<pid>:<uuid>` — unique per process.
pub fn default_holder() -> String {
  let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_owned());
  format!("{host}:{}:{}", std::process::id(), uuid::Uuid::new_v4())
}

impl Settings {
  /// The configured holder, or a newly generated one.
  pub fn holder(&self) -> String { self.holder.clone().unwrap_or_else(default_holder) }

  /// The configured holder. A generated one would never match on the next
  /// invocation, so `lock` and `unlock` refuse to run without it.
  pub fn explicit_holder(&self) -> anyhow::Result<&str> {
    match self.holder.as_deref() {
      Some(holder) => Ok(holder),
      None => bail!("set a lock holder with --holder or {ENV_PREFIX}_HOLDER to lock or unlock"),
    }
  }

  pub fn load(file: &Path, overrides: Overrides) -> anyhow::Result<Self> {
    let path_value = |p: Option<PathBuf>| p.map(|p| p.to_string_lossy().into_owned());

    let settings = config::Config::builder()
      .add_source(config::File::from(file).required(false))
      .add_source(config::Environment::with_prefix(ENV_PREFIX))
      .set_override_option("database", path_value(overrides.database))?
      .set_override_option("migrations_dir", path_value(overrides.migrations_dir))?
      .set_override_option("holder", overrides.holder)?
      .build()
      .with_context(|| format!("failed to read config from {}", file.display()))?;

    let mut cfg: Settings = settings
      .try_deserialize()
      .context("failed to deserialise settings (is `database` set?)")?;

    cfg.database = expand_tilde(&cfg.database);
    cfg.migrations_dir = expand_tilde(&cfg.migrations_dir);
    Ok(cfg)
  }
}

/// Expand a leading `~` to the user's home directory.
pub fn expand_tilde(path: &Path) -> PathBuf {
  let s = path.to_string_lossy();
  if let Some(rest) = s.strip_prefix("~/")
    && let Ok(home) = std::env::var("HOME")
  {
    return PathBuf::from(home).join(rest);
  }
  path.to_path_buf()
}
