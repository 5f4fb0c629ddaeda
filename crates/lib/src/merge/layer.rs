use std::collections::{BTreeMap, BTreeSet};

use serde::Serialize;
use tracing::{debug, warn};

use super::{MergeError, smart_merge};
use crate::config::validate::{self, ValidationError};
use crate::config::{
  Command, ConfigObject, DnsRecord, Environment, Host, Identity, Mergeable, Network, RemoteFile, Script,
};
use crate::issue::BuildError;
use crate::util::hash::hash_path;

/// A local file reference that could not be found on disk.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct Unresolved {
  /// Path of the object holding the reference, e.g. `/scripts/setup`.
  pub object: String,
  pub reference: String,
  /// File the reference was declared in.
  pub declared_in: String,
}

/// Every configuration object one layer declares, indexed by identity.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Layer {
  pub environments: BTreeMap<String, Environment>,
  pub hosts: BTreeMap<String, Host>,
  pub networks: BTreeMap<String, Network>,
  pub identities: BTreeMap<String, Identity>,
  pub scripts: BTreeMap<String, Script>,
  pub commands: BTreeMap<String, Command>,
  pub remote_files: BTreeMap<String, RemoteFile>,
  pub dns_records: BTreeMap<String, DnsRecord>,
  #[serde(skip_serializing_if = "BTreeSet::is_empty")]
  pub unresolved: BTreeSet<Unresolved>,
}

fn mask_collection<T: Mergeable>(base: &mut BTreeMap<String, T>, layer: BTreeMap<String, T>) -> Result<(), MergeError> {
  for (id, object) in layer {
    match base.get_mut(&id) {
      Some(existing) => {
        let merged = smart_merge(existing.clone(), object, false)?;
        *existing = merged;
      }
      None => {
        base.insert(id, object);
      }
    }
  }
  Ok(())
}

fn insert_folded<T: Mergeable>(collection: &mut BTreeMap<String, T>, object: T) -> Result<(), MergeError> {
  let id = object.identity().to_string();
  mask_collection(collection, BTreeMap::from([(id, object)]))
}

impl Layer {
  pub fn new() -> Self {
    Self::default()
  }

  /// Overlay `layer` onto this one, collection by collection.
  ///
  /// Objects only present in `layer` are inserted unchanged; shadowed objects go through
  /// [`smart_merge`] with the overlay's policy.
  pub fn mask(&mut self, layer: Layer) -> Result<(), MergeError> {
    mask_collection(&mut self.environments, layer.environments)?;
    mask_collection(&mut self.hosts, layer.hosts)?;
    mask_collection(&mut self.networks, layer.networks)?;
    mask_collection(&mut self.identities, layer.identities)?;
    mask_collection(&mut self.scripts, layer.scripts)?;
    mask_collection(&mut self.commands, layer.commands)?;
    mask_collection(&mut self.remote_files, layer.remote_files)?;
    mask_collection(&mut self.dns_records, layer.dns_records)?;
    self.unresolved.extend(layer.unresolved);
    Ok(())
  }

  /// Add one object; a second declaration of the same identity folds onto the first.
  pub fn insert(&mut self, object: ConfigObject) -> Result<(), MergeError> {
    match object {
      ConfigObject::Environment(o) => insert_folded(&mut self.environments, o),
      ConfigObject::Host(o) => insert_folded(&mut self.hosts, o),
      ConfigObject::Network(o) => insert_folded(&mut self.networks, o),
      ConfigObject::Identity(o) => insert_folded(&mut self.identities, o),
      ConfigObject::Script(o) => insert_folded(&mut self.scripts, o),
      ConfigObject::Command(o) => insert_folded(&mut self.commands, o),
      ConfigObject::RemoteFile(o) => insert_folded(&mut self.remote_files, o),
      ConfigObject::DnsRecord(o) => insert_folded(&mut self.dns_records, o),
    }
  }

  /// Look an object up by its definition path, e.g. `/hosts/web`.
  pub fn lookup(&self, path: &str) -> Option<ConfigObject> {
    let (kind, id) = path.trim_start_matches('/').split_once('/')?;
    match kind {
      "envs" => self.environments.get(id).cloned().map(ConfigObject::Environment),
      "hosts" => self.hosts.get(id).cloned().map(ConfigObject::Host),
      "networks" => self.networks.get(id).cloned().map(ConfigObject::Network),
      "identities" => self.identities.get(id).cloned().map(ConfigObject::Identity),
      "scripts" => self.scripts.get(id).cloned().map(ConfigObject::Script),
      "commands" => self.commands.get(id).cloned().map(ConfigObject::Command),
      "files" => self.remote_files.get(id).cloned().map(ConfigObject::RemoteFile),
      "dns-records" => self.dns_records.get(id).cloned().map(ConfigObject::DnsRecord),
      _ => None,
    }
  }

  pub fn object_count(&self) -> usize {
    self.environments.len()
      + self.hosts.len()
      + self.networks.len()
      + self.identities.len()
      + self.scripts.len()
      + self.commands.len()
      + self.remote_files.len()
      + self.dns_records.len()
  }

  /// Locate every local script and remote file source through its provenance.
  ///
  /// Found sources get their absolute path and content digest cached on the object.
  /// Missing ones are added to [`Layer::unresolved`].
  pub fn resolve_assets(&mut self) {
    for script in self.scripts.values_mut().filter(|s| s.is_local() && !s.source.is_empty()) {
      match script.provenance.locate(&script.source) {
        Some(path) => match hash_path(&path) {
          Ok(digest) => {
            script.source_digest = Some(digest.0);
            script.abs_path = Some(path);
          }
          Err(e) => {
            warn!(script = %script.id, error = %e, "script source unreadable");
            self.unresolved.insert(Unresolved {
              object: script.path(),
              reference: script.source.clone(),
              declared_in: script.provenance.current_file(),
            });
          }
        },
        None => {
          self.unresolved.insert(Unresolved {
            object: script.path(),
            reference: script.source.clone(),
            declared_in: script.provenance.current_file(),
          });
        }
      }
    }

    for file in self.remote_files.values_mut().filter(|f| f.is_local() && !f.source.is_empty()) {
      match file.provenance.locate(&file.source).map(|path| (hash_path(&path), path)) {
        Some((Ok(digest), path)) => {
          file.source_digest = Some(digest.0);
          file.abs_path = Some(path);
        }
        _ => {
          self.unresolved.insert(Unresolved {
            object: file.path(),
            reference: file.source.clone(),
            declared_in: file.provenance.current_file(),
          });
        }
      }
    }

    debug!(unresolved = self.unresolved.len(), "resolved layer assets");
  }

  /// Fail with one aggregated error if any reference stayed unresolved.
  pub fn ensure_resolved(&self) -> Result<(), BuildError> {
    if self.unresolved.is_empty() {
      return Ok(());
    }
    let errors = self
      .unresolved
      .iter()
      .map(|u| {
        BuildError::new(format!("cannot find {}", u.reference))
          .var("object", &u.object)
          .var("declared_in", &u.declared_in)
      })
      .collect();
    Err(BuildError::aggregate(
      format!("{} file reference(s) could not be resolved", self.unresolved.len()),
      errors,
    ))
  }

  /// Run every per-type validator over the layer.
  pub fn validate(&self) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    errors.extend(self.environments.values().flat_map(validate::validate_environment));
    errors.extend(self.hosts.values().flat_map(validate::validate_host));
    errors.extend(self.networks.values().flat_map(validate::validate_network));
    errors.extend(self.scripts.values().flat_map(validate::validate_script));
    errors.extend(self.commands.values().flat_map(validate::validate_command));
    errors.extend(self.remote_files.values().flat_map(validate::validate_remote_file));
    errors.extend(self.dns_records.values().flat_map(validate::validate_dns_record));
    errors
  }
}
