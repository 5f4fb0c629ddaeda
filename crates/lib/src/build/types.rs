//! Instance objects produced by expanding an environment.
//!
//! A [`Build`] owns one [`Team`] per team number; each team owns its provisioned
//! networks, hosts, connections and steps. IDs are hierarchical paths, so an instance's
//! ID starts with its team's ID.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::config::{Command, DnsRecord, ProvisionerKind, RemoteFile, Script};
use crate::util::hash::{Checksum, HashError, Hashable};

fn checksum_of(value: serde_json::Value) -> Result<Checksum, HashError> {
  let bytes = serde_json::to_vec(&value)?;
  Ok(Checksum::of_bytes(&bytes))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Build {
  pub id: String,
  pub environment_id: String,
  pub revision: u32,
  pub team_count: u32,
  pub teams: BTreeMap<u32, Team>,
}

impl Build {
  pub fn checksum(&self) -> Result<Checksum, HashError> {
    checksum_of(json!({
      "id": self.id,
      "environment_id": self.environment_id,
      "revision": self.revision,
      "team_count": self.team_count,
    }))
  }

  /// The team an instance ID belongs to.
  pub fn team_of(&self, id: &str) -> Option<&Team> {
    self.teams.values().find(|team| {
      id == team.id || id.strip_prefix(team.id.as_str()).is_some_and(|rest| rest.starts_with('/'))
    })
  }

  /// Find a provisioned host by ID across all teams.
  pub fn provisioned_host(&self, id: &str) -> Option<&ProvisionedHost> {
    self
      .team_of(id)?
      .provisioned_networks
      .values()
      .flat_map(|pnet| pnet.provisioned_hosts.values())
      .find(|phost| phost.id == id)
  }

  /// Find a provisioning step by ID, together with its host.
  pub fn provisioning_step(&self, id: &str) -> Option<(&ProvisionedHost, &ProvisioningStep)> {
    self
      .team_of(id)?
      .provisioned_networks
      .values()
      .flat_map(|pnet| pnet.provisioned_hosts.values())
      .find_map(|phost| phost.provisioning_steps.iter().find(|s| s.id == id).map(|s| (phost, s)))
  }

  pub fn provisioned_hosts(&self) -> impl Iterator<Item = &ProvisionedHost> {
    self
      .teams
      .values()
      .flat_map(|team| team.provisioned_networks.values())
      .flat_map(|pnet| pnet.provisioned_hosts.values())
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
  pub id: String,
  pub build_id: String,
  pub team_number: u32,
  pub provisioned_networks: BTreeMap<String, ProvisionedNetwork>,
}

impl Team {
  pub fn checksum(&self) -> Result<Checksum, HashError> {
    checksum_of(json!({
      "id": self.id,
      "build_id": self.build_id,
      "team_number": self.team_number,
    }))
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionedNetwork {
  pub id: String,
  pub team_id: String,
  /// Path of the network definition, e.g. `/networks/corp`.
  pub network_id: String,
  pub name: String,
  pub cidr: String,
  pub network_checksum: Checksum,
  pub provisioned_hosts: BTreeMap<String, ProvisionedHost>,
}

impl ProvisionedNetwork {
  pub fn checksum(&self) -> Result<Checksum, HashError> {
    checksum_of(json!({
      "id": self.id,
      "name": self.name,
      "cidr": self.cidr,
      "network": self.network_checksum,
    }))
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisionedHost {
  pub id: String,
  pub provisioned_network_id: String,
  /// Path of the host definition, e.g. `/hosts/web`.
  pub host_id: String,
  pub subnet_ip: String,
  pub host_checksum: Checksum,
  pub connection: Connection,
  pub provisioning_steps: Vec<ProvisioningStep>,
  /// IDs of provisioned hosts in the same team that must come first.
  pub depends_on: Vec<String>,
}

impl ProvisionedHost {
  pub fn checksum(&self) -> Result<Checksum, HashError> {
    checksum_of(json!({
      "id": self.id,
      "subnet_ip": self.subnet_ip,
      "host": self.host_checksum,
      "depends_on": self.depends_on,
    }))
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SshAuth {
  pub user: String,
  pub port: u16,
  pub identity_file: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WinRmAuth {
  pub user: String,
  pub password: String,
  pub port: u16,
  pub https: bool,
}

/// How the engine reaches a provisioned host once it exists.
///
/// `remote_addr`, `resource_name` and `active` are discovered at deploy time (see the
/// connection descriptor written next to the build) and are not part of the checksum.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Connection {
  pub id: String,
  pub provisioned_host_id: String,
  pub local_addr: String,
  #[serde(default)]
  pub remote_addr: String,
  #[serde(default)]
  pub resource_name: String,
  #[serde(default)]
  pub active: bool,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub ssh: Option<SshAuth>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub winrm: Option<WinRmAuth>,
}

impl Connection {
  pub fn checksum(&self) -> Result<Checksum, HashError> {
    checksum_of(json!({
      "id": self.id,
      "local_addr": self.local_addr,
      "ssh": self.ssh,
      "winrm": self.winrm,
    }))
  }

  /// Address jobs should talk to: the discovered remote address, else the planned one.
  pub fn target_addr(&self) -> &str {
    if self.remote_addr.is_empty() { &self.local_addr } else { &self.remote_addr }
  }
}

/// The definition a step runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "definition", rename_all = "snake_case")]
pub enum Provisioner {
  Script(Script),
  Command(Command),
  RemoteFile(RemoteFile),
  DnsRecord(DnsRecord),
}

impl Provisioner {
  pub fn kind(&self) -> ProvisionerKind {
    match self {
      Self::Script(_) => ProvisionerKind::Script,
      Self::Command(_) => ProvisionerKind::Command,
      Self::RemoteFile(_) => ProvisionerKind::RemoteFile,
      Self::DnsRecord(_) => ProvisionerKind::DnsRecord,
    }
  }

  pub fn id(&self) -> &str {
    match self {
      Self::Script(s) => &s.id,
      Self::Command(c) => &c.id,
      Self::RemoteFile(f) => &f.id,
      Self::DnsRecord(d) => &d.id,
    }
  }

  /// Definition path, e.g. `/scripts/setup`.
  pub fn path(&self) -> String {
    format!("/{}/{}", self.kind().collection(), self.id())
  }

  pub fn checksum(&self) -> Result<Checksum, HashError> {
    match self {
      Self::Script(s) => s.checksum(),
      Self::Command(c) => c.checksum(),
      Self::RemoteFile(f) => f.checksum(),
      Self::DnsRecord(d) => d.checksum(),
    }
  }

  pub fn is_disabled(&self) -> bool {
    match self {
      Self::Script(s) => s.disabled,
      Self::Command(c) => c.disabled,
      Self::RemoteFile(f) => f.disabled,
      Self::DnsRecord(d) => d.disabled,
    }
  }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvisioningStep {
  pub id: String,
  pub provisioned_host_id: String,
  pub step_number: u32,
  pub provisioner: Provisioner,
}

impl ProvisioningStep {
  pub fn checksum(&self) -> Result<Checksum, HashError> {
    checksum_of(json!({
      "id": self.id,
      "step_number": self.step_number,
      "kind": self.provisioner.kind(),
      "provisioner": self.provisioner.id(),
      "provisioner_checksum": self.provisioner.checksum()?,
    }))
  }
}
