//! Configuration entities as they appear in layer files.
//!
//! Every entity carries an `id`, an optional `on_conflict` block and a provenance stack.
//! Provenance and resolution caches are excluded from serialization, so they never
//! influence a checksum. The conflict block is read from layer files but not written
//! back out.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::object::impl_mergeable;
use super::policy::OnConflict;
use crate::provenance::Provenance;
use crate::util::hash::Hashable;

/// A network included in an environment, optionally restricted to some hosts.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct IncludedNetwork {
  pub name: String,
  pub hosts: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Environment {
  pub id: String,
  pub name: String,
  pub description: String,
  pub competition_id: String,
  pub builder: String,
  pub team_count: u32,
  pub revision: u32,
  pub admin_cidrs: Vec<String>,
  pub exposed_vdi_ports: Vec<String>,
  pub networks: Vec<IncludedNetwork>,
  pub config: BTreeMap<String, String>,
  pub tags: BTreeMap<String, String>,
  #[serde(skip_serializing)]
  pub on_conflict: Option<OnConflict>,
  #[serde(skip)]
  pub provenance: Provenance,
}

impl_mergeable!(
  Environment,
  "envs",
  [
    name,
    description,
    competition_id,
    builder,
    team_count,
    revision,
    admin_cidrs,
    exposed_vdi_ports,
    networks,
    config,
    tags,
  ]
);

impl Hashable for Environment {}

/// Another host that must be provisioned before this one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct HostDependency {
  pub host: String,
  pub network: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Host {
  pub id: String,
  pub hostname: String,
  pub description: String,
  pub os: String,
  pub instance_size: String,
  pub last_octet: u32,
  pub disk_size: u32,
  pub allow_mac_changes: bool,
  pub override_password: String,
  pub exposed_tcp_ports: Vec<String>,
  pub exposed_udp_ports: Vec<String>,
  pub user_groups: Vec<String>,
  /// Provisioner references in execution order, e.g. `scripts/setup` or `/commands/reboot`.
  pub provision_steps: Vec<String>,
  pub depends_on: Vec<HostDependency>,
  pub vars: BTreeMap<String, String>,
  pub tags: BTreeMap<String, String>,
  #[serde(skip_serializing)]
  pub on_conflict: Option<OnConflict>,
  #[serde(skip)]
  pub provenance: Provenance,
}

impl_mergeable!(
  Host,
  "hosts",
  [
    hostname,
    description,
    os,
    instance_size,
    last_octet,
    disk_size,
    allow_mac_changes,
    override_password,
    exposed_tcp_ports,
    exposed_udp_ports,
    user_groups,
    provision_steps,
    depends_on,
    vars,
    tags,
  ]
);

impl Hashable for Host {}

impl Host {
  pub fn is_windows(&self) -> bool {
    self.os.to_ascii_lowercase().contains("windows")
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Network {
  pub id: String,
  pub name: String,
  pub cidr: String,
  pub vdi_visible: bool,
  pub vars: BTreeMap<String, String>,
  pub tags: BTreeMap<String, String>,
  #[serde(skip_serializing)]
  pub on_conflict: Option<OnConflict>,
  #[serde(skip)]
  pub provenance: Provenance,
}

impl_mergeable!(Network, "networks", [name, cidr, vdi_visible, vars, tags]);

impl Hashable for Network {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Identity {
  pub id: String,
  pub first_name: String,
  pub last_name: String,
  pub email: String,
  pub password: String,
  pub description: String,
  pub avatar_file: String,
  pub vars: BTreeMap<String, String>,
  pub tags: BTreeMap<String, String>,
  #[serde(skip_serializing)]
  pub on_conflict: Option<OnConflict>,
  #[serde(skip)]
  pub provenance: Provenance,
}

impl_mergeable!(
  Identity,
  "identities",
  [first_name, last_name, email, password, description, avatar_file, vars, tags]
);

impl Hashable for Identity {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Script {
  pub id: String,
  pub name: String,
  pub language: String,
  pub description: String,
  /// Script file, relative to the declaring layer file or absolute.
  pub source: String,
  /// `local` (a file next to the layer) or `remote` (fetched by the target).
  pub source_type: String,
  pub cooldown: u64,
  pub timeout: u64,
  pub ignore_errors: bool,
  pub disabled: bool,
  pub args: Vec<String>,
  pub vars: BTreeMap<String, String>,
  pub tags: BTreeMap<String, String>,
  /// Digest of the resolved source file, filled in once the layer is resolved.
  #[serde(skip_deserializing, skip_serializing_if = "Option::is_none")]
  pub source_digest: Option<String>,
  #[serde(skip)]
  pub abs_path: Option<PathBuf>,
  #[serde(skip_serializing)]
  pub on_conflict: Option<OnConflict>,
  #[serde(skip)]
  pub provenance: Provenance,
}

impl_mergeable!(
  Script,
  "scripts",
  [
    name,
    language,
    description,
    source,
    source_type,
    cooldown,
    timeout,
    ignore_errors,
    disabled,
    args,
    vars,
    tags,
    source_digest,
    abs_path,
  ]
);

impl Hashable for Script {}

impl Script {
  /// Whether the source is a file the engine must find on disk.
  pub fn is_local(&self) -> bool {
    self.source_type.is_empty() || self.source_type == "local"
  }

  /// Interpreter used to run the script on the target.
  pub fn interpreter(&self) -> &str {
    match self.language.as_str() {
      "" | "shell" | "sh" => "sh",
      "powershell" | "ps1" => "powershell",
      other => other,
    }
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Command {
  pub id: String,
  pub name: String,
  pub description: String,
  pub program: String,
  pub args: Vec<String>,
  pub cooldown: u64,
  pub timeout: u64,
  pub ignore_errors: bool,
  pub disabled: bool,
  pub vars: BTreeMap<String, String>,
  pub tags: BTreeMap<String, String>,
  #[serde(skip_serializing)]
  pub on_conflict: Option<OnConflict>,
  #[serde(skip)]
  pub provenance: Provenance,
}

impl_mergeable!(
  Command,
  "commands",
  [
    name,
    description,
    program,
    args,
    cooldown,
    timeout,
    ignore_errors,
    disabled,
    vars,
    tags,
  ]
);

impl Hashable for Command {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RemoteFile {
  pub id: String,
  pub source: String,
  pub source_type: String,
  pub destination: String,
  pub perms: String,
  pub disabled: bool,
  pub vars: BTreeMap<String, String>,
  pub tags: BTreeMap<String, String>,
  #[serde(skip_deserializing, skip_serializing_if = "Option::is_none")]
  pub source_digest: Option<String>,
  #[serde(skip)]
  pub abs_path: Option<PathBuf>,
  #[serde(skip_serializing)]
  pub on_conflict: Option<OnConflict>,
  #[serde(skip)]
  pub provenance: Provenance,
}

impl_mergeable!(
  RemoteFile,
  "files",
  [
    source,
    source_type,
    destination,
    perms,
    disabled,
    vars,
    tags,
    source_digest,
    abs_path,
  ]
);

impl Hashable for RemoteFile {}

impl RemoteFile {
  pub fn is_local(&self) -> bool {
    self.source_type.is_empty() || self.source_type == "local"
  }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DnsRecord {
  pub id: String,
  pub name: String,
  pub record_type: String,
  pub zone_name: String,
  pub values: Vec<String>,
  pub disabled: bool,
  pub vars: BTreeMap<String, String>,
  pub tags: BTreeMap<String, String>,
  #[serde(skip_serializing)]
  pub on_conflict: Option<OnConflict>,
  #[serde(skip)]
  pub provenance: Provenance,
}

impl_mergeable!(
  DnsRecord,
  "dns-records",
  [name, record_type, zone_name, values, disabled, vars, tags]
);

impl Hashable for DnsRecord {}

/// The kinds of definition a provisioning step can run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProvisionerKind {
  Script,
  Command,
  RemoteFile,
  DnsRecord,
}

impl ProvisionerKind {
  /// Collection name, matching [`Mergeable::kind`](super::Mergeable::kind).
  pub fn collection(&self) -> &'static str {
    match self {
      Self::Script => "scripts",
      Self::Command => "commands",
      Self::RemoteFile => "files",
      Self::DnsRecord => "dns-records",
    }
  }
}

/// A typed reference from a host's `provision_steps` to a provisioner definition.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProvisionerRef {
  pub kind: ProvisionerKind,
  pub id: String,
}

impl ProvisionerRef {
  pub fn path(&self) -> String {
    format!("/{}/{}", self.kind.collection(), self.id)
  }
}

impl fmt::Display for ProvisionerRef {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}/{}", self.kind.collection(), self.id)
  }
}

impl FromStr for ProvisionerRef {
  type Err = String;

  fn from_str(s: &str) -> Result<Self, Self::Err> {
    let trimmed = s.trim_start_matches('/');
    let (collection, id) = trimmed
      .split_once('/')
      .ok_or_else(|| format!("provisioner reference {s:?} must look like <collection>/<id>"))?;
    let kind = match collection {
      "scripts" => ProvisionerKind::Script,
      "commands" => ProvisionerKind::Command,
      "files" | "remote-files" => ProvisionerKind::RemoteFile,
      "dns-records" => ProvisionerKind::DnsRecord,
      other => return Err(format!("unknown provisioner collection {other:?} in {s:?}")),
    };
    if id.is_empty() || id.contains('/') {
      return Err(format!("provisioner reference {s:?} has an invalid id"));
    }
    Ok(Self {
      kind,
      id: id.to_string(),
    })
  }
}
