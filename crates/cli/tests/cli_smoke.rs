//! CLI smoke tests for rangeforge.
//!
//! Every command runs against layer files in a temp directory with its own data
//! directory, so no test sees another's stored snapshots.

use std::path::{Path, PathBuf};

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

/// One team, one network, two hosts; `web` depends on `db`.
const RANGE: &str = r#"{
  "environments": [
    { "id": "range", "team_count": 1, "networks": [{ "name": "corp", "hosts": ["web", "db"] }] }
  ],
  "networks": [{ "id": "corp", "cidr": "10.0.1.0/24" }],
  "hosts": [
    {
      "id": "web",
      "os": "ubuntu",
      "last_octet": 10,
      "provision_steps": ["scripts/setup", "commands/restart"],
      "depends_on": [{ "host": "db", "network": "corp" }]
    },
    { "id": "db", "os": "ubuntu", "last_octet": 20, "provision_steps": ["commands/restart"] }
  ],
  "scripts": [{ "id": "setup", "source": "setup.sh" }],
  "commands": [{ "id": "restart", "program": "systemctl", "args": ["restart", "nginx"] }]
}"#;

/// An environment without hosts: only the terraform jobs of its single team run.
const BARE: &str = r#"{ "environments": [{ "id": "bare", "team_count": 1 }] }"#;

fn rangeforge(data_dir: &Path) -> Command {
  let mut cmd = cargo_bin_cmd!("rangeforge");
  cmd.env("RANGEFORGE_DATA_DIR", data_dir).env_remove("RUST_LOG");
  cmd
}

struct Workspace {
  temp: TempDir,
}

impl Workspace {
  fn new() -> Self {
    let temp = TempDir::new().unwrap();
    std::fs::write(temp.path().join("setup.sh"), "#!/bin/sh\necho setup\n").unwrap();
    std::fs::write(temp.path().join("range.json"), RANGE).unwrap();
    std::fs::write(temp.path().join("bare.json"), BARE).unwrap();
    Self { temp }
  }

  fn layer(&self, name: &str) -> PathBuf {
    self.temp.path().join(name)
  }

  fn data_dir(&self) -> PathBuf {
    self.temp.path().join("data")
  }

  fn cmd(&self) -> Command {
    rangeforge(&self.data_dir())
  }
}

// =============================================================================
// Help & Version
// =============================================================================

#[test]
fn help_flag_works() {
  let ws = Workspace::new();
  ws.cmd()
    .arg("--help")
    .assert()
    .success()
    .stdout(predicate::str::contains("Usage"));
}

#[test]
fn version_flag_works() {
  let ws = Workspace::new();
  ws.cmd()
    .arg("--version")
    .assert()
    .success()
    .stdout(predicate::str::contains("rangeforge"));
}

#[test]
fn subcommand_help_works() {
  let ws = Workspace::new();
  for cmd in &["merge", "snapshot", "plan", "graph", "tf-needs", "run", "status"] {
    ws.cmd()
      .arg(cmd)
      .arg("--help")
      .assert()
      .success()
      .stdout(predicate::str::contains("Usage"));
  }
}

// =============================================================================
// Merge
// =============================================================================

#[test]
fn merge_lists_every_collection() {
  let ws = Workspace::new();
  ws.cmd()
    .arg("merge")
    .arg(ws.layer("range.json"))
    .assert()
    .success()
    .stdout(predicate::str::contains("Hosts"))
    .stdout(predicate::str::contains("web"))
    .stdout(predicate::str::contains("setup"));
}

#[test]
fn merge_json_is_parseable() {
  let ws = Workspace::new();
  let output = ws
    .cmd()
    .args(["--output", "json", "merge"])
    .arg(ws.layer("range.json"))
    .output()
    .unwrap();
  assert!(output.status.success());
  let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  assert!(value["hosts"]["web"].is_object());
  assert!(value["environments"]["range"].is_object());
}

#[test]
fn merge_files_lists_the_layer() {
  let ws = Workspace::new();
  ws.cmd()
    .args(["merge", "--files"])
    .arg(ws.layer("range.json"))
    .assert()
    .success()
    .stdout(predicate::str::contains("range.json"));
}

#[test]
fn invalid_layer_fails() {
  let ws = Workspace::new();
  std::fs::write(ws.layer("broken.json"), "{ not json").unwrap();
  ws.cmd()
    .arg("merge")
    .arg(ws.layer("broken.json"))
    .assert()
    .failure()
    .stderr(predicate::str::contains("Failed to load configuration layers"));
}

#[test]
fn missing_layer_fails() {
  let ws = Workspace::new();
  ws.cmd()
    .arg("merge")
    .arg(ws.layer("absent.json"))
    .assert()
    .failure();
}

// =============================================================================
// Snapshot, Graph & Plan
// =============================================================================

#[test]
fn unknown_environment_fails() {
  let ws = Workspace::new();
  ws.cmd()
    .arg("plan")
    .arg(ws.layer("range.json"))
    .args(["--env", "nowhere"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("nowhere"));
}

#[test]
fn snapshot_reports_checksum() {
  let ws = Workspace::new();
  ws.cmd()
    .arg("snapshot")
    .arg(ws.layer("range.json"))
    .args(["--env", "range"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Snapshot of /envs/range/build"))
    .stdout(predicate::str::contains("provisioning_step"));
}

#[test]
fn graph_prints_dot() {
  let ws = Workspace::new();
  ws.cmd()
    .arg("graph")
    .arg(ws.layer("range.json"))
    .args(["--env", "range"])
    .assert()
    .success()
    .stdout(predicate::str::starts_with("digraph"))
    .stdout(predicate::str::contains("/envs/range/build/teams/0"));
}

#[test]
fn first_plan_creates_everything() {
  let ws = Workspace::new();
  ws.cmd()
    .arg("plan")
    .arg(ws.layer("range.json"))
    .args(["--env", "range"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Priority 20:"))
    .stdout(predicate::str::contains("hosts/web/steps/0-setup"));
}

#[test]
fn saved_snapshot_makes_plan_empty() {
  let ws = Workspace::new();
  ws.cmd()
    .args(["snapshot", "--save"])
    .arg(ws.layer("range.json"))
    .args(["--env", "range"])
    .assert()
    .success();

  ws.cmd()
    .arg("plan")
    .arg(ws.layer("range.json"))
    .args(["--env", "range"])
    .assert()
    .success()
    .stdout(predicate::str::contains("up to date"));

  ws.cmd()
    .args(["status", "--env", "range"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Build: /envs/range/build"));
}

#[test]
fn tf_needs_lists_team_commands() {
  let ws = Workspace::new();
  ws.cmd()
    .arg("tf-needs")
    .arg(ws.layer("range.json"))
    .args(["--env", "range"])
    .assert()
    .success()
    .stdout(predicate::str::contains("/envs/range/build/teams/0:"))
    .stdout(predicate::str::contains("terraform apply -input=false -auto-approve"));
}

#[test]
fn tf_needs_taints_reported_resource() {
  let ws = Workspace::new();
  ws.cmd()
    .args(["snapshot", "--save"])
    .arg(ws.layer("range.json"))
    .args(["--env", "range"])
    .assert()
    .success();

  let descriptor = ws
    .data_dir()
    .join("builds/envs-range-build/teams/0/networks/corp/hosts/db/conn.laforge");
  std::fs::create_dir_all(descriptor.parent().unwrap()).unwrap();
  std::fs::write(
    &descriptor,
    r#"{"remote_addr":"203.0.113.20","resource_name":"aws_instance.db","active":true}"#,
  )
  .unwrap();
  std::fs::write(
    ws.layer("bigger.json"),
    r#"{"hosts":[{"id":"db","instance_size":"xlarge"}]}"#,
  )
  .unwrap();

  ws.cmd()
    .arg("tf-needs")
    .arg(ws.layer("range.json"))
    .arg(ws.layer("bigger.json"))
    .args(["--env", "range"])
    .assert()
    .success()
    .stdout(predicate::str::contains("terraform taint aws_instance.db"));
}

// =============================================================================
// Status & Run
// =============================================================================

#[test]
fn status_without_state() {
  let ws = Workspace::new();
  ws.cmd()
    .args(["status", "--env", "range"])
    .assert()
    .success()
    .stdout(predicate::str::contains("No stored snapshot"));
  assert!(!ws.data_dir().join("builds").exists());
}

#[cfg(unix)]
#[test]
fn run_stores_snapshot_on_success() {
  let ws = Workspace::new();
  ws.cmd()
    .arg("run")
    .arg(ws.layer("bare.json"))
    .args(["--env", "bare", "--terraform", "true", "--no-cooldowns"])
    .assert()
    .success();

  ws.cmd()
    .args(["status", "--env", "bare"])
    .assert()
    .success()
    .stdout(predicate::str::contains("Nodes: 3"));

  ws.cmd()
    .arg("run")
    .arg(ws.layer("bare.json"))
    .args(["--env", "bare", "--terraform", "true"])
    .assert()
    .success()
    .stdout(predicate::str::contains("up to date"));
}

#[cfg(unix)]
#[test]
fn failed_run_keeps_previous_state() {
  let ws = Workspace::new();
  ws.cmd()
    .arg("run")
    .arg(ws.layer("bare.json"))
    .args(["--env", "bare", "--terraform", "false"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("job(s) failed"));

  ws.cmd()
    .args(["status", "--env", "bare"])
    .assert()
    .success()
    .stdout(predicate::str::contains("No stored snapshot"));
}
