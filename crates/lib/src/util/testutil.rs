//! Test utilities for rangeforge-lib.
//!
//! Cross-platform shell helpers plus a small on-disk competition used by tests that
//! need the whole load, build and snapshot pipeline.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::Span;

use crate::build::{Build, ResolvedEnvironment, materialize_build, resolve_environment};
use crate::load::load_layers;
use crate::snapshot::{Snapshot, SnapshotBuilder};

/// Returns the shell command and args to execute a shell script.
#[cfg(unix)]
pub fn shell_cmd(script: &str) -> (&'static str, Vec<String>) {
  ("/bin/sh", vec!["-c".to_string(), script.to_string()])
}

#[cfg(windows)]
pub fn shell_cmd(script: &str) -> (&'static str, Vec<String>) {
  ("cmd.exe", vec!["/C".to_string(), script.to_string()])
}

/// Returns the command and args to echo a message.
///
/// On Windows, echo is a shell builtin, so we wrap it in cmd.exe.
#[cfg(unix)]
pub fn echo_msg(msg: &str) -> (&'static str, Vec<String>) {
  ("/bin/echo", vec![msg.to_string()])
}

#[cfg(windows)]
pub fn echo_msg(msg: &str) -> (&'static str, Vec<String>) {
  ("cmd.exe", vec!["/C".to_string(), format!("echo {}", msg)])
}

pub fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
  let path = dir.join(name);
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).unwrap();
  }
  fs::write(&path, contents).unwrap();
  path
}

/// One team, one network, two hosts. `web` depends on `db` and runs a script, a
/// command and a DNS registration; `db` runs a single command.
pub const SCENARIO: &str = r#"{
  "environments": [
    { "id": "prod", "team_count": 1, "networks": [{ "name": "corp", "hosts": ["web", "db"] }] }
  ],
  "networks": [{ "id": "corp", "cidr": "10.0.1.0/24" }],
  "hosts": [
    {
      "id": "web",
      "os": "ubuntu",
      "last_octet": 10,
      "provision_steps": ["scripts/setup", "commands/restart", "dns-records/www"],
      "depends_on": [{ "host": "db", "network": "corp" }]
    },
    { "id": "db", "os": "ubuntu", "last_octet": 20, "provision_steps": ["commands/init"] }
  ],
  "scripts": [{ "id": "setup", "source": "setup.sh", "args": ["--fast"] }],
  "commands": [
    { "id": "restart", "program": "systemctl", "args": ["restart", "nginx"] },
    { "id": "init", "program": "initdb" }
  ],
  "dns_records": [{ "id": "www", "name": "www", "zone_name": "corp.lan", "values": ["10.0.1.10"] }]
}"#;

/// Write [`SCENARIO`] and its script into `dir`, returning the layer file.
pub fn write_scenario(dir: &Path) -> PathBuf {
  write_file(dir, "setup.sh", "#!/bin/sh\necho setup\n");
  write_file(dir, "env.json", SCENARIO)
}

/// Load, resolve, materialize and snapshot `env_id` from `paths`.
pub async fn pipeline(paths: &[PathBuf], env_id: &str) -> (Arc<ResolvedEnvironment>, Arc<Build>, Snapshot) {
  let layer = load_layers(paths).unwrap();
  let resolved = Arc::new(resolve_environment(&layer, env_id).unwrap());
  let build = Arc::new(materialize_build(&resolved).unwrap());
  let snapshot = SnapshotBuilder::new(Span::none())
    .build(resolved.clone(), build.clone())
    .await
    .unwrap();
  (resolved, build, snapshot)
}
