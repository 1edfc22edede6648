//! Migration file discovery.
//!
//! Scripts live in a single directory and are classified by file name:
//!
//! - `V<version>__<description>.sql` — versioned migration
//! - `U<version>__<description>.sql` — rollback script for `<version>`
//! - `R__<name>.sql` — repeatable migration
//!
//! Underscores in descriptions become spaces. Files without a `.sql`
//! extension, and hidden files, are ignored.

use std::{
  collections::BTreeMap,
  fs,
  path::{Path, PathBuf},
};

use schemalog_core::version::compare_versions;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DiscoverError {
  #[error("cannot read {}: {source}", path.display())]
  Io {
    path:   PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("unrecognised migration file name: {} (expected V<version>__<desc>.sql, U<version>__<desc>.sql or R__<name>.sql)", .0.display())]
  UnrecognisedName(PathBuf),

  #[error("version {version} is defined twice: {} and {}", first.display(), second.display())]
  DuplicateVersion {
    version: String,
    first:   PathBuf,
    second:  PathBuf,
  },

  #[error("rollback script for version {0} is defined twice")]
  DuplicateRollback(String),

  #[error("repeatable migration {0} is defined twice")]
  DuplicateRepeatable(String),

  #[error("rollback script {} has no versioned migration {version}", path.display())]
  OrphanRollback { version: String, path: PathBuf },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedScript {
  pub version:      String,
  pub description:  String,
  pub path:         PathBuf,
  pub sql:          String,
  pub rollback_sql: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepeatableScript {
  pub name:        String,
  pub description: String,
  pub path:        PathBuf,
  pub sql:         String,
}

/// Everything found in a migrations directory. Versioned scripts are in
/// natural version order, repeatables in name order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationSet {
  pub versioned:  Vec<VersionedScript>,
  pub repeatable: Vec<RepeatableScript>,
}

impl MigrationSet {
  pub fn versions(&self) -> Vec<String> {
    self.versioned.iter().map(|s| s.version.clone()).collect()
  }

  pub fn get(&self, version: &str) -> Option<&VersionedScript> {
    self.versioned.iter().find(|s| s.version == version)
  }
}

#[derive(Debug, PartialEq, Eq)]
enum ScriptName {
  Versioned { version: String, description: String },
  Rollback { version: String },
  Repeatable { name: String },
}

fn humanize(s: &str) -> String { s.replace('_', " ").trim().to_owned() }

fn parse_name(stem: &str) -> Option<ScriptName> {
  if let Some(name) = stem.strip_prefix("R__") {
    return (!name.is_empty()).then(|| ScriptName::Repeatable { name: name.to_owned() });
  }

  let (kind, rest) = stem.split_at_checked(1)?;
  let (version, description) = rest.split_once("__")?;
  if version.is_empty() || version.contains(char::is_whitespace) {
    return None;
  }
  let version = version.to_owned();
  match kind {
    "V" => Some(ScriptName::Versioned { version, description: humanize(description) }),
    "U" => Some(ScriptName::Rollback { version }),
    _ => None,
  }
}

fn read(path: &Path) -> Result<String, DiscoverError> {
  fs::read_to_string(path).map_err(|source| DiscoverError::Io { path: path.to_owned(), source })
}

/// Scan `dir` and pair every versioned script with its rollback script.
pub fn discover(dir: &Path) -> Result<MigrationSet, DiscoverError> {
  let io_err = |source| DiscoverError::Io { path: dir.to_owned(), source };

  let mut paths = Vec::new();
  for entry in fs::read_dir(dir).map_err(io_err)? {
    let path = entry.map_err(io_err)?.path();
    if path.is_file() {
      paths.push(path);
    }
  }
  paths.sort();

  let mut versioned: BTreeMap<String, VersionedScript> = BTreeMap::new();
  let mut rollbacks: BTreeMap<String, (PathBuf, String)> = BTreeMap::new();
  let mut repeatable: BTreeMap<String, RepeatableScript> = BTreeMap::new();

  for path in paths {
    let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else { continue };
    if file_name.starts_with('.') {
      continue;
    }
    let Some(stem) = file_name.strip_suffix(".sql") else { continue };

    match parse_name(stem) {
      Some(ScriptName::Versioned { version, description }) => {
        if let Some(first) = versioned.get(&version) {
          return Err(DiscoverError::DuplicateVersion {
            version,
            first: first.path.clone(),
            second: path,
          });
        }
        let sql = read(&path)?;
        versioned.insert(version.clone(), VersionedScript {
          version,
          description,
          path,
          sql,
          rollback_sql: None,
        });
      }
      Some(ScriptName::Rollback { version }) => {
        if rollbacks.contains_key(&version) {
          return Err(DiscoverError::DuplicateRollback(version));
        }
        let sql = read(&path)?;
        rollbacks.insert(version, (path, sql));
      }
      Some(ScriptName::Repeatable { name }) => {
        if repeatable.contains_key(&name) {
          return Err(DiscoverError::DuplicateRepeatable(name));
        }
        let sql = read(&path)?;
        repeatable.insert(name.clone(), RepeatableScript {
          description: humanize(&name),
          name,
          path,
          sql,
        });
      }
      None => return Err(DiscoverError::UnrecognisedName(path)),
    }
  }

  for (version, (path, sql)) in rollbacks {
    match versioned.get_mut(&version) {
      Some(script) => script.rollback_sql = Some(sql),
      None => return Err(DiscoverError::OrphanRollback { version, path }),
    }
  }

  let mut versioned: Vec<VersionedScript> = versioned.into_values().collect();
  versioned.sort_by(|a, b| compare_versions(&a.version, &b.version));

  Ok(MigrationSet {
    versioned,
    repeatable: repeatable.into_values().collect(),
  })
}
