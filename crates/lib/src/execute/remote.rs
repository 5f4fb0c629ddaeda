//! Collaborators jobs hand their side effects to.
//!
//! [`RemoteExecutor`] runs programs on and copies files to a provisioned host through its
//! [`Connection`]; [`DnsRegistrar`] publishes DNS records. The engine ships local
//! implementations: [`LocalExecutor`] runs everything in a per-host directory on this
//! machine and [`ZoneFileRegistrar`] appends records to zone files.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use super::actions::{execute_cmd, execute_program};
use super::types::ExecuteError;
use crate::build::{Build, Connection};
use crate::config::DnsRecord;
use crate::config::validate::parse_mode;
use crate::platform::paths::{conn_descriptor_path, slug};

#[async_trait]
pub trait RemoteExecutor: Send + Sync {
  /// Run `program` on the host behind `conn` and return its trimmed stdout.
  async fn exec(
    &self,
    conn: &Connection,
    program: &str,
    args: &[String],
    env: &BTreeMap<String, String>,
    timeout: Option<Duration>,
  ) -> Result<String, ExecuteError>;

  /// Copy a local file to `destination` on the host.
  async fn upload(&self, conn: &Connection, source: &Path, destination: &str, perms: &str) -> Result<(), ExecuteError>;
}

#[async_trait]
pub trait DnsRegistrar: Send + Sync {
  async fn register(&self, record: &DnsRecord) -> Result<(), ExecuteError>;
}

/// What a builder writes to `conn.laforge` once a host is reachable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionDescriptor {
  pub remote_addr: String,
  pub resource_name: String,
  pub active: bool,
}

impl ConnectionDescriptor {
  /// Read a descriptor. `Ok(None)` when the builder has not written it yet.
  pub async fn read(path: &Path) -> Result<Option<Self>, ExecuteError> {
    match tokio::fs::read(path).await {
      Ok(bytes) => serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|source| ExecuteError::Descriptor {
          path: path.to_path_buf(),
          source,
        }),
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
      Err(e) => Err(e.into()),
    }
  }

  pub async fn write(&self, path: &Path) -> Result<(), ExecuteError> {
    if let Some(parent) = path.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }
    let bytes = serde_json::to_vec_pretty(self).map_err(|source| ExecuteError::Descriptor {
      path: path.to_path_buf(),
      source,
    })?;
    tokio::fs::write(path, bytes).await?;
    Ok(())
  }

  /// Copy the discovered fields onto a planned connection.
  pub fn apply_to(&self, conn: &mut Connection) {
    conn.remote_addr = self.remote_addr.clone();
    conn.resource_name = self.resource_name.clone();
    conn.active = self.active;
  }
}

/// Fold the descriptors a builder left under `build_dir` into the planned connections
/// of `build`, returning how many hosts had one.
///
/// Hosts without a descriptor keep their planned, inactive connection.
pub async fn refresh_connections(build: &mut Build, build_dir: &Path) -> Result<usize, ExecuteError> {
  let build_id = build.id.clone();
  let mut found = 0;
  for team in build.teams.values_mut() {
    for pnet in team.provisioned_networks.values_mut() {
      for phost in pnet.provisioned_hosts.values_mut() {
        let path = conn_descriptor_path(build_dir, &build_id, &phost.id);
        if let Some(descriptor) = ConnectionDescriptor::read(&path).await? {
          descriptor.apply_to(&mut phost.connection);
          found += 1;
        }
      }
    }
  }
  debug!(build = %build_id, found, "connections refreshed");
  Ok(found)
}

/// Runs every host's commands on this machine, each in its own directory.
///
/// `{root}/<host-slug>` stands in for the host's filesystem root: uploads land below it and
/// commands run with it as working directory and `RANGEFORGE_HOST_ROOT` pointing at it.
#[derive(Debug, Clone)]
pub struct LocalExecutor {
  root: PathBuf,
  shell: Option<String>,
}

impl LocalExecutor {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self {
      root: root.into(),
      shell: None,
    }
  }

  /// Shell for commands declared as a single command line.
  pub fn with_shell(mut self, shell: Option<String>) -> Self {
    self.shell = shell;
    self
  }

  /// Directory standing in for the host behind `conn`.
  pub fn host_root(&self, conn: &Connection) -> PathBuf {
    self.root.join(slug(&conn.provisioned_host_id))
  }

  fn resolve(&self, conn: &Connection, destination: &str) -> PathBuf {
    destination
      .split(['/', '\\'])
      .filter(|part| !part.is_empty() && *part != ".." && *part != "." && !part.ends_with(':'))
      .fold(self.host_root(conn), |dir, part| dir.join(part))
  }
}

#[async_trait]
impl RemoteExecutor for LocalExecutor {
  async fn exec(
    &self,
    conn: &Connection,
    program: &str,
    args: &[String],
    env: &BTreeMap<String, String>,
    timeout: Option<Duration>,
  ) -> Result<String, ExecuteError> {
    let host_root = self.host_root(conn);
    tokio::fs::create_dir_all(&host_root).await?;

    let mut env = env.clone();
    env.insert("RANGEFORGE_HOST_ROOT".into(), host_root.display().to_string());
    env.insert("RANGEFORGE_TARGET".into(), conn.target_addr().to_string());

    if args.is_empty() && program.contains(char::is_whitespace) {
      debug!(host = %conn.provisioned_host_id, cmd = %program, "local shell exec");
      return execute_cmd(program, &env, &host_root, self.shell.as_deref(), timeout).await;
    }

    // Programs addressed by an absolute in-host path resolve below the host root.
    let program = if program.starts_with('/') && !Path::new(program).exists() {
      self.resolve(conn, program).display().to_string()
    } else {
      program.to_string()
    };
    let args: Vec<String> = args
      .iter()
      .map(|arg| {
        let local = self.resolve(conn, arg);
        if arg.starts_with('/') && local.exists() {
          local.display().to_string()
        } else {
          arg.clone()
        }
      })
      .collect();

    debug!(host = %conn.provisioned_host_id, program = %program, "local exec");
    execute_program(&program, &args, &env, &host_root, timeout).await
  }

  async fn upload(&self, conn: &Connection, source: &Path, destination: &str, perms: &str) -> Result<(), ExecuteError> {
    if !source.exists() {
      return Err(ExecuteError::MissingAsset(source.to_path_buf()));
    }
    let mode = match perms {
      "" => None,
      perms => Some(parse_mode(perms).ok_or_else(|| ExecuteError::InvalidPerms(perms.to_string()))?),
    };
    let target = self.resolve(conn, destination);
    if let Some(parent) = target.parent() {
      tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::copy(source, &target).await?;
    if let Some(mode) = mode {
      set_perms(&target, mode).await?;
    }

    info!(
      host = %conn.provisioned_host_id,
      source = %source.display(),
      destination = %destination,
      "uploaded"
    );
    Ok(())
  }
}

#[cfg(unix)]
async fn set_perms(path: &Path, mode: u32) -> Result<(), ExecuteError> {
  use std::os::unix::fs::PermissionsExt;

  tokio::fs::set_permissions(path, std::fs::Permissions::from_mode(mode)).await?;
  Ok(())
}

#[cfg(not(unix))]
async fn set_perms(_path: &Path, _mode: u32) -> Result<(), ExecuteError> {
  Ok(())
}

/// Appends records to one zone file per zone, one line per value.
///
/// The file is `{dir}/{zone}.zone` with the zone's trailing dot dropped and any character
/// outside `[A-Za-z0-9._]` replaced by `-`, so `corp.example.` lands in
/// `{dir}/corp.example.zone`. An empty zone name uses `default.zone`.
#[derive(Debug, Clone)]
pub struct ZoneFileRegistrar {
  dir: PathBuf,
}

impl ZoneFileRegistrar {
  pub fn new(dir: impl Into<PathBuf>) -> Self {
    Self { dir: dir.into() }
  }

  pub fn zone_path(&self, zone: &str) -> PathBuf {
    let zone = zone.trim_end_matches('.');
    let zone = if zone.is_empty() { "default" } else { zone };
    self.dir.join(format!("{}.zone", slug(zone)))
  }
}

#[async_trait]
impl DnsRegistrar for ZoneFileRegistrar {
  async fn register(&self, record: &DnsRecord) -> Result<(), ExecuteError> {
    tokio::fs::create_dir_all(&self.dir).await?;
    let path = self.zone_path(&record.zone_name);
    let name = if record.name.is_empty() { &record.id } else { &record.name };
    let record_type = if record.record_type.is_empty() { "A" } else { &record.record_type };

    let mut lines = String::new();
    for value in &record.values {
      lines.push_str(&format!("{name}\tIN\t{record_type}\t{value}\n"));
    }

    let mut file = tokio::fs::OpenOptions::new()
      .create(true)
      .append(true)
      .open(&path)
      .await?;
    file.write_all(lines.as_bytes()).await?;
    file.flush().await?;

    info!(record = %record.id, zone = %path.display(), values = record.values.len(), "dns record registered");
    Ok(())
  }
}
