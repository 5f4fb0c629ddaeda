//! Shared fixtures for library integration tests.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rangeforge_lib::build::{Build, ResolvedEnvironment, materialize_build, resolve_environment};
use rangeforge_lib::load::load_layers;
use rangeforge_lib::snapshot::{Snapshot, SnapshotBuilder};
use tracing::Span;

pub const WEB: &str = "/envs/range/build/teams/0/networks/corp/hosts/web";
pub const DB: &str = "/envs/range/build/teams/0/networks/corp/hosts/db";

/// One team, one network, two hosts with three steps each. Only `web` runs the
/// `setup` script.
pub const RANGE: &str = r#"{
  "environments": [
    { "id": "range", "team_count": 1, "networks": [{ "name": "corp", "hosts": ["web", "db"] }] }
  ],
  "networks": [{ "id": "corp", "cidr": "10.0.1.0/24" }],
  "hosts": [
    {
      "id": "web",
      "os": "ubuntu",
      "last_octet": 10,
      "provision_steps": ["scripts/setup", "commands/restart", "files/motd"]
    },
    {
      "id": "db",
      "os": "ubuntu",
      "last_octet": 20,
      "provision_steps": ["commands/init", "commands/restart", "files/motd"]
    }
  ],
  "scripts": [{ "id": "setup", "source": "setup.sh" }],
  "commands": [
    { "id": "restart", "program": "systemctl", "args": ["restart", "app"] },
    { "id": "init", "program": "initdb" }
  ],
  "remote_files": [{ "id": "motd", "source": "motd.txt", "destination": "/etc/motd", "perms": "0644" }]
}"#;

pub fn write_file(dir: &Path, name: &str, contents: &str) -> PathBuf {
  let path = dir.join(name);
  if let Some(parent) = path.parent() {
    fs::create_dir_all(parent).unwrap();
  }
  fs::write(&path, contents).unwrap();
  path
}

/// Write the range fixture and its assets, returning the root layer file.
pub fn write_range(dir: &Path) -> PathBuf {
  write_file(dir, "setup.sh", "#!/bin/sh\necho setup\n");
  write_file(dir, "motd.txt", "welcome\n");
  write_file(dir, "range.json", RANGE)
}

pub fn resolve(paths: &[PathBuf], env_id: &str) -> (Arc<ResolvedEnvironment>, Arc<Build>) {
  let layer = load_layers(paths).unwrap();
  let resolved = Arc::new(resolve_environment(&layer, env_id).unwrap());
  let build = Arc::new(materialize_build(&resolved).unwrap());
  (resolved, build)
}

pub async fn snapshot_with(paths: &[PathBuf], env_id: &str, jitter: Option<u64>) -> Snapshot {
  let (resolved, build) = resolve(paths, env_id);
  let mut builder = SnapshotBuilder::new(Span::none());
  if let Some(seed) = jitter {
    builder = builder.with_scheduling_jitter(seed);
  }
  builder.build(resolved, build).await.unwrap()
}

pub async fn snapshot(paths: &[PathBuf], env_id: &str) -> Snapshot {
  snapshot_with(paths, env_id, None).await
}
