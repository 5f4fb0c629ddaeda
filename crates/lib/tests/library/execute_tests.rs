//! Running a plan on this machine through the local executor.

use std::sync::Arc;

use rangeforge_lib::execute::{
  ConnectionDescriptor, ExecuteConfig, JobContext, LocalExecutor, ZoneFileRegistrar, execute_plan,
};
use rangeforge_lib::plan::calculate_delta;
use rangeforge_lib::platform::paths::{build_dir, conn_descriptor_path};
use rangeforge_lib::snapshot::SnapshotStore;
use tempfile::TempDir;
use tracing::Span;

use super::common::{resolve, snapshot, write_file};

const BOX: &str = "/envs/lab/build/teams/0/networks/lan/hosts/box";

const LAB: &str = r#"{
  "environments": [
    { "id": "lab", "team_count": 1, "networks": [{ "name": "lan", "hosts": ["box"] }] }
  ],
  "networks": [{ "id": "lan", "cidr": "10.0.2.0/24" }],
  "hosts": [
    {
      "id": "box",
      "os": "debian",
      "last_octet": 5,
      "provision_steps": ["scripts/hello", "files/motd", "commands/mark", "dns-records/box"]
    }
  ],
  "scripts": [{ "id": "hello", "source": "hello.sh", "args": ["world"] }],
  "remote_files": [{ "id": "motd", "source": "motd.txt", "destination": "/etc/motd", "perms": "0644" }],
  "commands": [{ "id": "mark", "program": "touch marked" }],
  "dns_records": [{ "id": "box", "name": "box", "zone_name": "lab.lan", "values": ["10.0.2.5"] }]
}"#;

#[cfg(unix)]
#[tokio::test]
async fn plan_runs_locally_and_settles() {
  let temp = TempDir::new().unwrap();
  write_file(temp.path(), "hello.sh", "echo \"$1\" > \"$RANGEFORGE_HOST_ROOT/hello.txt\"\n");
  write_file(temp.path(), "motd.txt", "welcome to the lab\n");
  let root = write_file(temp.path(), "lab.json", LAB);
  let paths = [root];

  let data_dir = temp.path().join("data");
  let (_, build) = resolve(&paths, "lab");
  let live = snapshot(&paths, "lab").await;
  let store = SnapshotStore::for_build(&data_dir, &build.id).unwrap();
  let plan = calculate_delta(&live, store.load().unwrap().as_ref()).unwrap();

  let ctx = JobContext {
    executor: Arc::new(LocalExecutor::new(temp.path().join("hosts")).with_shell(Some("/bin/sh".into()))),
    dns: Arc::new(ZoneFileRegistrar::new(temp.path().join("zones"))),
    build_id: build.id.clone(),
    build_dir: build_dir(&data_dir, &build.id),
    config: ExecuteConfig {
      parallelism: 2,
      terraform_bin: "true".into(),
      honor_cooldowns: false,
      ..Default::default()
    },
  };
  ConnectionDescriptor {
    remote_addr: "127.0.0.1".into(),
    resource_name: "local.box".into(),
    active: true,
  }
  .write(&conn_descriptor_path(&ctx.build_dir, &ctx.build_id, BOX))
  .await
  .unwrap();

  let host_root = LocalExecutor::new(temp.path().join("hosts")).host_root(&build.provisioned_host(BOX).unwrap().connection);
  let zone = ZoneFileRegistrar::new(temp.path().join("zones")).zone_path("lab.lan");

  let report = execute_plan(&plan, &live, &build, ctx, &Span::none()).await.unwrap();
  assert!(report.is_success(), "failures: {:?}", report.failed);
  // terraform plus four steps
  assert_eq!(report.succeeded.len(), 5);

  assert_eq!(std::fs::read_to_string(host_root.join("hello.txt")).unwrap(), "world\n");
  assert_eq!(
    std::fs::read_to_string(host_root.join("etc/motd")).unwrap(),
    "welcome to the lab\n"
  );
  assert!(host_root.join("marked").exists());
  assert_eq!(std::fs::read_to_string(zone).unwrap(), "box\tIN\tA\t10.0.2.5\n");

  store.save(&live).unwrap();
  let again = calculate_delta(&snapshot(&paths, "lab").await, store.load().unwrap().as_ref()).unwrap();
  assert!(again.is_empty());
}
