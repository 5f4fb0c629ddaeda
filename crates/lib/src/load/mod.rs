//! Layer file reader.
//!
//! A layer file is a JSON document holding typed objects per collection plus optional
//! `include` directives:
//!
//! ```json
//! {
//!   "include": ["hosts/*.json", "scripts.json"],
//!   "environments": [{ "id": "prod", "team_count": 2, "networks": [{ "name": "corp" }] }],
//!   "hosts": [{ "id": "web", "provision_steps": ["scripts/setup"] }],
//!   "scripts": [{ "id": "setup", "source": "setup.sh" }]
//! }
//! ```
//!
//! Includes resolve relative to the including file and may be glob patterns. The
//! including file's own objects form the base; each included file is masked on top of
//! it in declaration order. Several top-level layer files fold left to right.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::config::{
  Command, ConfigObject, DnsRecord, Environment, Host, Identity, Mergeable, Network, RemoteFile, Script,
};
use crate::issue::BuildError;
use crate::merge::{Layer, MergeError, Unresolved};
use crate::provenance::{Provenance, Source};

#[derive(Debug, Error)]
pub enum LoadError {
  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: std::io::Error,
  },

  #[error("failed to parse {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  #[error("invalid include pattern {pattern:?} in {path}: {source}")]
  Pattern {
    path: PathBuf,
    pattern: String,
    #[source]
    source: glob::PatternError,
  },

  #[error("include cycle: {path} includes itself")]
  IncludeCycle { path: PathBuf },

  #[error("merge failed while loading {path}: {source}")]
  Merge {
    path: PathBuf,
    #[source]
    source: MergeError,
  },

  #[error("{0}")]
  Unresolved(BuildError),

  #[error("{count} validation error(s):\n{details}")]
  Invalid { count: usize, details: String },
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct LayerFile {
  include: Vec<String>,
  environments: Vec<Environment>,
  hosts: Vec<Host>,
  networks: Vec<Network>,
  identities: Vec<Identity>,
  scripts: Vec<Script>,
  commands: Vec<Command>,
  remote_files: Vec<RemoteFile>,
  dns_records: Vec<DnsRecord>,
}

fn stamp<T: Mergeable>(objects: Vec<T>, source: &Source, wrap: fn(T) -> ConfigObject) -> Vec<ConfigObject> {
  objects
    .into_iter()
    .map(|mut object| {
      object.set_provenance(Provenance::new(source.clone()));
      wrap(object)
    })
    .collect()
}

impl LayerFile {
  fn into_objects(self, source: &Source) -> Vec<ConfigObject> {
    let mut objects = Vec::new();
    objects.extend(stamp(self.environments, source, ConfigObject::Environment));
    objects.extend(stamp(self.hosts, source, ConfigObject::Host));
    objects.extend(stamp(self.networks, source, ConfigObject::Network));
    objects.extend(stamp(self.identities, source, ConfigObject::Identity));
    objects.extend(stamp(self.scripts, source, ConfigObject::Script));
    objects.extend(stamp(self.commands, source, ConfigObject::Command));
    objects.extend(stamp(self.remote_files, source, ConfigObject::RemoteFile));
    objects.extend(stamp(self.dns_records, source, ConfigObject::DnsRecord));
    objects
  }
}

fn is_pattern(include: &str) -> bool {
  include.contains(['*', '?', '['])
}

fn canonical(path: &Path) -> PathBuf {
  dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

/// Expand one include directive into the files it names, sorted for determinism.
fn expand_include(including: &Path, include: &str) -> Result<Vec<PathBuf>, LoadError> {
  let dir = including.parent().unwrap_or_else(|| Path::new("."));
  let joined = dir.join(include);

  if !is_pattern(include) {
    return Ok(vec![joined]);
  }

  let pattern = joined.to_string_lossy().to_string();
  let paths = glob::glob(&pattern).map_err(|source| LoadError::Pattern {
    path: including.to_path_buf(),
    pattern: include.to_string(),
    source,
  })?;
  let mut matched: Vec<PathBuf> = paths.filter_map(Result::ok).filter(|p| p.is_file()).collect();
  matched.sort();
  Ok(matched)
}

fn read_file(path: &Path, included_by: Option<&Path>, stack: &mut Vec<PathBuf>) -> Result<Layer, LoadError> {
  let canonical_path = canonical(path);
  if stack.contains(&canonical_path) {
    return Err(LoadError::IncludeCycle {
      path: path.to_path_buf(),
    });
  }

  let contents = fs::read_to_string(path).map_err(|source| LoadError::Read {
    path: path.to_path_buf(),
    source,
  })?;
  let file: LayerFile = serde_json::from_str(&contents).map_err(|source| LoadError::Parse {
    path: path.to_path_buf(),
    source,
  })?;

  let mut source = Source::new(&canonical_path);
  if let Some(parent) = included_by {
    source = source.included_by(parent);
  }

  let merge_err = |source: MergeError| LoadError::Merge {
    path: path.to_path_buf(),
    source,
  };

  let includes = file.include.clone();
  let mut layer = Layer::new();
  for object in file.into_objects(&source) {
    layer.insert(object).map_err(merge_err)?;
  }

  stack.push(canonical_path.clone());
  for include in &includes {
    let targets = expand_include(&canonical_path, include)?;
    for target in targets {
      if !target.exists() {
        layer.unresolved.insert(Unresolved {
          object: "include".to_string(),
          reference: include.clone(),
          declared_in: canonical_path.display().to_string(),
        });
        continue;
      }
      debug!(file = %target.display(), included_by = %canonical_path.display(), "including layer file");
      let included = read_file(&target, Some(&canonical_path), stack)?;
      layer.mask(included).map_err(merge_err)?;
    }
  }
  stack.pop();

  Ok(layer)
}

/// Read a single layer file and everything it includes.
pub fn load_layer_file(path: &Path) -> Result<Layer, LoadError> {
  read_file(path, None, &mut Vec::new())
}

/// Fold several layer files left to right into one resolved layer.
///
/// After folding, local file references are resolved, unresolved ones are reported in
/// aggregate, and every object is validated.
pub fn load_layers<P: AsRef<Path>>(paths: &[P]) -> Result<Layer, LoadError> {
  let mut merged = Layer::new();
  for path in paths {
    let path = path.as_ref();
    let layer = load_layer_file(path)?;
    merged.mask(layer).map_err(|source| LoadError::Merge {
      path: path.to_path_buf(),
      source,
    })?;
  }

  merged.resolve_assets();
  merged.ensure_resolved().map_err(LoadError::Unresolved)?;

  let errors = merged.validate();
  if !errors.is_empty() {
    let details: Vec<String> = errors.iter().map(|e| format!("  {e}")).collect();
    return Err(LoadError::Invalid {
      count: errors.len(),
      details: details.join("\n"),
    });
  }

  info!(
    layers = paths.len(),
    objects = merged.object_count(),
    "configuration layers merged"
  );
  Ok(merged)
}

/// Every layer file a set of roots pulls in, for display.
pub fn included_files<P: AsRef<Path>>(paths: &[P]) -> Result<BTreeSet<PathBuf>, LoadError> {
  let layer = {
    let mut merged = Layer::new();
    for path in paths {
      let path = path.as_ref();
      merged
        .mask(load_layer_file(path)?)
        .map_err(|source| LoadError::Merge {
          path: path.to_path_buf(),
          source,
        })?;
    }
    merged
  };

  let mut files = BTreeSet::new();
  macro_rules! collect {
    ($($collection:ident),*) => {
      $(
        for object in layer.$collection.values() {
          files.extend(object.provenance().sources().iter().map(|s| s.file.clone()));
        }
      )*
    };
  }
  collect!(environments, hosts, networks, identities, scripts, commands, remote_files, dns_records);
  Ok(files)
}
