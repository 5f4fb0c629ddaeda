use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dag::{Dag, DagError};
use crate::util::hash::{Checksum, HashError, combine_sorted};

/// Kind of object a snapshot node stands for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObjectType {
  Environment,
  Build,
  Team,
  ProvisionedNetwork,
  ProvisionedHost,
  Connection,
  ProvisioningStep,
  Host,
  Network,
  Identity,
  Script,
  Command,
  RemoteFile,
  DnsRecord,
}

/// Cost of definition-only nodes that never produce work on their own.
pub const DEFINITION_COST: u32 = u32::MAX;

impl ObjectType {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Environment => "environment",
      Self::Build => "build",
      Self::Team => "team",
      Self::ProvisionedNetwork => "provisioned_network",
      Self::ProvisionedHost => "provisioned_host",
      Self::Connection => "connection",
      Self::ProvisioningStep => "provisioning_step",
      Self::Host => "host",
      Self::Network => "network",
      Self::Identity => "identity",
      Self::Script => "script",
      Self::Command => "command",
      Self::RemoteFile => "remote_file",
      Self::DnsRecord => "dns_record",
    }
  }

  /// Scheduling cost; lower runs earlier. Steps are ordered by their number.
  pub fn cost(&self, step_number: Option<u32>) -> u32 {
    match self {
      Self::ProvisioningStep => 20 + step_number.unwrap_or(0),
      Self::ProvisionedHost => 15,
      Self::Connection => 12,
      Self::ProvisionedNetwork => 10,
      Self::Team => 5,
      Self::Build => 2,
      Self::Environment => 1,
      Self::Host | Self::Network | Self::Identity => 0,
      Self::Script | Self::Command | Self::RemoteFile | Self::DnsRecord => DEFINITION_COST,
    }
  }
}

impl fmt::Display for ObjectType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A node of the snapshot graph.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Metadata {
  pub id: String,
  pub object_type: ObjectType,
  pub checksum: Checksum,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub step_number: Option<u32>,
}

impl Metadata {
  pub fn new(id: impl Into<String>, object_type: ObjectType, checksum: Checksum) -> Self {
    Self {
      id: id.into(),
      object_type,
      checksum,
      step_number: None,
    }
  }

  pub fn with_step_number(mut self, step_number: u32) -> Self {
    self.step_number = Some(step_number);
    self
  }

  pub fn cost(&self) -> u32 {
    self.object_type.cost(self.step_number)
  }
}

#[derive(Debug, Error)]
pub enum SnapshotError {
  #[error("failed to checksum {id}: {source}")]
  Checksum {
    id: String,
    #[source]
    source: HashError,
  },

  #[error("{count} dangling dependency edge(s), first: {parent} -> {child}")]
  DanglingDependency {
    count: usize,
    parent: String,
    child: String,
  },

  #[error("graph error: {0}")]
  Graph(#[from] DagError),

  #[error("snapshot producer task failed: {0}")]
  Producer(String),

  #[error("snapshot worker {0} exited without reporting completion")]
  WorkerLost(&'static str),
}

/// The content-addressed state of one build: every node's metadata plus the graph.
#[derive(Debug, Clone)]
pub struct Snapshot {
  pub build_id: String,
  pub metastore: BTreeMap<String, Metadata>,
  pub dag: Dag,
  pub checksum: Checksum,
}

impl Snapshot {
  pub fn new(build_id: impl Into<String>, metastore: BTreeMap<String, Metadata>, dag: Dag) -> Self {
    let checksum = combine_sorted(metastore.values().map(|m| m.checksum));
    Self {
      build_id: build_id.into(),
      metastore,
      dag,
      checksum,
    }
  }

  pub fn get(&self, id: &str) -> Option<&Metadata> {
    self.metastore.get(id)
  }

  pub fn len(&self) -> usize {
    self.metastore.len()
  }

  pub fn is_empty(&self) -> bool {
    self.metastore.is_empty()
  }

  /// IDs of the nodes that must come before `id`.
  pub fn parent_ids(&self, id: &str) -> Vec<String> {
    self.dag.parents(id)
  }

  /// IDs of the nodes that depend on `id`.
  pub fn dependency_ids(&self, id: &str) -> Vec<String> {
    self.dag.children(id)
  }

  pub fn count_of(&self, object_type: ObjectType) -> usize {
    self.metastore.values().filter(|m| m.object_type == object_type).count()
  }

  /// The persisted form.
  pub fn to_stored(&self) -> StoredSnapshot {
    StoredSnapshot {
      build_id: self.build_id.clone(),
      checksum: self.checksum,
      metastore: self.metastore.clone(),
      edges: self.dag.edges(),
    }
  }
}

/// A snapshot as read back from `build.db`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredSnapshot {
  pub build_id: String,
  pub checksum: Checksum,
  pub metastore: BTreeMap<String, Metadata>,
  pub edges: Vec<(String, String)>,
}
