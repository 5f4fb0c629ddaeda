//! Resolving an environment against a merged layer and materializing its build.

use std::collections::BTreeMap;
use std::net::Ipv4Addr;

use thiserror::Error;
use tracing::{debug, info};

use super::types::{
  Build, Connection, ProvisionedHost, ProvisionedNetwork, Provisioner, ProvisioningStep, SshAuth, Team, WinRmAuth,
};
use crate::config::validate::parse_cidr;
use crate::config::{
  Command, DnsRecord, Environment, Host, Identity, Mergeable, Network, ProvisionerKind, ProvisionerRef, RemoteFile,
  Script,
};
use crate::consts::IDENTITY_FILE_PLACEHOLDER;
use crate::issue::BuildError;
use crate::merge::Layer;
use crate::util::hash::{HashError, Hashable};

#[derive(Debug, Error)]
pub enum ExpandError {
  #[error("environment {0} is not defined")]
  UnknownEnvironment(String),

  #[error("{0}")]
  Unresolved(BuildError),

  #[error("failed to checksum {id}: {source}")]
  Checksum {
    id: String,
    #[source]
    source: HashError,
  },
}

/// An environment with every definition it refers to pulled out of the layer.
#[derive(Debug, Clone, Default)]
pub struct ResolvedEnvironment {
  pub environment: Environment,
  pub networks: BTreeMap<String, Network>,
  pub hosts: BTreeMap<String, Host>,
  /// Network ID → host IDs placed on it, in declaration order.
  pub hosts_by_network: BTreeMap<String, Vec<String>>,
  pub identities: BTreeMap<String, Identity>,
  pub scripts: BTreeMap<String, Script>,
  pub commands: BTreeMap<String, Command>,
  pub remote_files: BTreeMap<String, RemoteFile>,
  pub dns_records: BTreeMap<String, DnsRecord>,
}

pub fn environment_path(env_id: &str) -> String {
  format!("/envs/{env_id}")
}

pub fn build_path(env_id: &str) -> String {
  format!("/envs/{env_id}/build")
}

impl ResolvedEnvironment {
  pub fn path(&self) -> String {
    environment_path(&self.environment.id)
  }

  pub fn build_path(&self) -> String {
    build_path(&self.environment.id)
  }

  /// Look up the definition a step reference points at.
  pub fn provisioner(&self, reference: &ProvisionerRef) -> Option<Provisioner> {
    match reference.kind {
      ProvisionerKind::Script => self.scripts.get(&reference.id).cloned().map(Provisioner::Script),
      ProvisionerKind::Command => self.commands.get(&reference.id).cloned().map(Provisioner::Command),
      ProvisionerKind::RemoteFile => self.remote_files.get(&reference.id).cloned().map(Provisioner::RemoteFile),
      ProvisionerKind::DnsRecord => self.dns_records.get(&reference.id).cloned().map(Provisioner::DnsRecord),
    }
  }

  /// Parsed step references of a host, in order.
  pub fn step_refs(&self, host: &Host) -> Vec<ProvisionerRef> {
    host.provision_steps.iter().filter_map(|s| s.parse().ok()).collect()
  }
}

/// Pull an environment and its referenced definitions out of a merged layer.
///
/// Every broken reference is collected; the error lists all of them at once.
pub fn resolve_environment(layer: &Layer, env_id: &str) -> Result<ResolvedEnvironment, ExpandError> {
  let environment = layer
    .environments
    .get(env_id)
    .cloned()
    .ok_or_else(|| ExpandError::UnknownEnvironment(env_id.to_string()))?;

  let mut resolved = ResolvedEnvironment {
    environment: environment.clone(),
    identities: layer.identities.clone(),
    ..Default::default()
  };
  let mut problems: Vec<BuildError> = Vec::new();

  for included in &environment.networks {
    let Some(network) = layer.networks.get(&included.name) else {
      problems.push(
        BuildError::new("environment includes an undefined network")
          .var("environment", env_id)
          .var("network", &included.name),
      );
      continue;
    };
    resolved.networks.insert(network.id.clone(), network.clone());

    let placed = resolved.hosts_by_network.entry(network.id.clone()).or_default();
    for host_id in &included.hosts {
      let Some(host) = layer.hosts.get(host_id) else {
        problems.push(
          BuildError::new("network includes an undefined host")
            .var("network", &network.id)
            .var("host", host_id),
        );
        continue;
      };
      if !placed.contains(host_id) {
        placed.push(host_id.clone());
      }
      resolved.hosts.insert(host.id.clone(), host.clone());
    }
  }

  for host in resolved.hosts.values() {
    for (step_number, step) in host.provision_steps.iter().enumerate() {
      let reference: ProvisionerRef = match step.parse() {
        Ok(reference) => reference,
        Err(message) => {
          problems.push(BuildError::new(message).var("host", &host.id).var("step", step_number));
          continue;
        }
      };
      let found = match reference.kind {
        ProvisionerKind::Script => layer
          .scripts
          .get(&reference.id)
          .map(|s| resolved.scripts.insert(s.id.clone(), s.clone()))
          .is_some(),
        ProvisionerKind::Command => layer
          .commands
          .get(&reference.id)
          .map(|c| resolved.commands.insert(c.id.clone(), c.clone()))
          .is_some(),
        ProvisionerKind::RemoteFile => layer
          .remote_files
          .get(&reference.id)
          .map(|f| resolved.remote_files.insert(f.id.clone(), f.clone()))
          .is_some(),
        ProvisionerKind::DnsRecord => layer
          .dns_records
          .get(&reference.id)
          .map(|d| resolved.dns_records.insert(d.id.clone(), d.clone()))
          .is_some(),
      };
      if !found {
        problems.push(
          BuildError::new("provisioning step references an unknown provisioner")
            .var("host", &host.id)
            .var("step", step_number)
            .var("ref", &reference),
        );
      }
    }

    for dep in &host.depends_on {
      let placed = resolved
        .hosts_by_network
        .get(&dep.network)
        .is_some_and(|hosts| hosts.contains(&dep.host));
      if !placed {
        problems.push(
          BuildError::new("host depends on a host the environment does not include")
            .var("host", &host.id)
            .var("depends_on", format!("{}/{}", dep.network, dep.host)),
        );
      }
    }
  }

  if !problems.is_empty() {
    let count = problems.len();
    return Err(ExpandError::Unresolved(
      BuildError::aggregate(format!("environment {env_id} has {count} unresolved reference(s)"), problems)
        .var("file", environment.provenance.current_file()),
    ));
  }

  debug!(
    environment = env_id,
    networks = resolved.networks.len(),
    hosts = resolved.hosts.len(),
    "environment resolved"
  );
  Ok(resolved)
}

fn subnet_ip(cidr: &str, last_octet: u32) -> String {
  match parse_cidr(cidr) {
    Some((addr, _)) => {
      let base = u32::from(addr) & 0xffff_ff00;
      Ipv4Addr::from(base | (last_octet & 0xff)).to_string()
    }
    None => String::new(),
  }
}

fn connection_for(phost_id: &str, host: &Host, local_addr: &str) -> Connection {
  let (ssh, winrm) = if host.is_windows() {
    let winrm = WinRmAuth {
      user: "Administrator".to_string(),
      password: host.override_password.clone(),
      port: 5986,
      https: true,
    };
    (None, Some(winrm))
  } else {
    let ssh = SshAuth {
      user: "root".to_string(),
      port: 22,
      identity_file: IDENTITY_FILE_PLACEHOLDER.to_string(),
    };
    (Some(ssh), None)
  };

  Connection {
    id: format!("{phost_id}/conn"),
    provisioned_host_id: phost_id.to_string(),
    local_addr: local_addr.to_string(),
    remote_addr: String::new(),
    resource_name: String::new(),
    active: false,
    ssh,
    winrm,
  }
}

fn checksum_err(id: &str) -> impl FnOnce(HashError) -> ExpandError + '_ {
  move |source| ExpandError::Checksum {
    id: id.to_string(),
    source,
  }
}

/// Materialize the build: one team per team number, each with its provisioned
/// networks, hosts, connections and steps.
pub fn materialize_build(resolved: &ResolvedEnvironment) -> Result<Build, ExpandError> {
  let env = &resolved.environment;
  let build_id = resolved.build_path();
  let mut teams = BTreeMap::new();

  for team_number in 0..env.team_count {
    let team_id = format!("{build_id}/teams/{team_number}");
    let mut provisioned_networks = BTreeMap::new();

    for (network_id, network) in &resolved.networks {
      let pnet_id = format!("{team_id}/networks/{network_id}");
      let network_checksum = network.checksum().map_err(checksum_err(&pnet_id))?;
      let mut provisioned_hosts = BTreeMap::new();

      for host_id in resolved.hosts_by_network.get(network_id).into_iter().flatten() {
        let Some(host) = resolved.hosts.get(host_id) else {
          continue;
        };
        let phost_id = format!("{pnet_id}/hosts/{host_id}");
        let ip = subnet_ip(&network.cidr, host.last_octet);

        let mut steps = Vec::new();
        for (step_number, reference) in resolved.step_refs(host).into_iter().enumerate() {
          let Some(provisioner) = resolved.provisioner(&reference) else {
            continue;
          };
          steps.push(ProvisioningStep {
            id: format!("{phost_id}/steps/{step_number}-{}", reference.id),
            provisioned_host_id: phost_id.clone(),
            step_number: step_number as u32,
            provisioner,
          });
        }

        let depends_on = host
          .depends_on
          .iter()
          .map(|dep| format!("{team_id}/networks/{}/hosts/{}", dep.network, dep.host))
          .collect();

        let phost = ProvisionedHost {
          id: phost_id.clone(),
          provisioned_network_id: pnet_id.clone(),
          host_id: host.path(),
          subnet_ip: ip.clone(),
          host_checksum: host.checksum().map_err(checksum_err(&phost_id))?,
          connection: connection_for(&phost_id, host, &ip),
          provisioning_steps: steps,
          depends_on,
        };
        provisioned_hosts.insert(host_id.clone(), phost);
      }

      provisioned_networks.insert(
        network_id.clone(),
        ProvisionedNetwork {
          id: pnet_id.clone(),
          team_id: team_id.clone(),
          network_id: network.path(),
          name: if network.name.is_empty() { network.id.clone() } else { network.name.clone() },
          cidr: network.cidr.clone(),
          network_checksum,
          provisioned_hosts,
        },
      );
    }

    teams.insert(
      team_number,
      Team {
        id: team_id,
        build_id: build_id.clone(),
        team_number,
        provisioned_networks,
      },
    );
  }

  info!(build = %build_id, teams = teams.len(), "build materialized");
  Ok(Build {
    id: build_id,
    environment_id: resolved.path(),
    revision: env.revision,
    team_count: env.team_count,
    teams,
  })
}
