//! Planning against a stored snapshot.

use std::collections::BTreeSet;

use rangeforge_lib::execute::{ConnectionDescriptor, refresh_connections};
use rangeforge_lib::platform::paths::{build_dir, conn_descriptor_path};
use rangeforge_lib::plan::{TaskAction, TerraformCommand, calculate_delta, calculate_terraform_needs};
use rangeforge_lib::snapshot::SnapshotStore;
use tempfile::TempDir;

use super::common::{DB, WEB, resolve, snapshot, write_file, write_range};

const TEAM: &str = "/envs/range/build/teams/0";

#[tokio::test]
async fn replanning_unchanged_config_is_empty() {
  let temp = TempDir::new().unwrap();
  let root = write_range(temp.path());
  let paths = [root];
  let data_dir = temp.path().join("data");

  let first = snapshot(&paths, "range").await;
  let store = SnapshotStore::for_build(&data_dir, &first.build_id).unwrap();
  let plan = calculate_delta(&first, store.load().unwrap().as_ref()).unwrap();
  assert_eq!(plan.task_count(), first.len());
  assert!(plan.tasks().all(|t| t.action == TaskAction::Create));
  store.save(&first).unwrap();

  let second = snapshot(&paths, "range").await;
  let plan = calculate_delta(&second, store.load().unwrap().as_ref()).unwrap();
  assert!(plan.is_empty());
  assert!(plan.tasks_by_priority.values().all(Vec::is_empty));
  assert_eq!(plan.previous_checksum, Some(first.checksum));
}

#[tokio::test]
async fn script_content_change_touches_script_and_its_step() {
  let temp = TempDir::new().unwrap();
  let root = write_range(temp.path());
  let paths = [root];

  let before = snapshot(&paths, "range").await;
  write_file(temp.path(), "setup.sh", "#!/bin/sh\necho changed\n");
  let after = snapshot(&paths, "range").await;

  let plan = calculate_delta(&after, Some(&before.to_stored())).unwrap();
  let changed: BTreeSet<&str> = plan.tasks().map(|t| t.id.as_str()).collect();
  let expected_step = format!("{WEB}/steps/0-setup");
  assert_eq!(changed, BTreeSet::from(["/scripts/setup", expected_step.as_str()]));
  assert!(plan.tasks().all(|t| t.action == TaskAction::Recreate));

  let (_, build) = resolve(&paths, "range");
  assert!(calculate_terraform_needs(&plan, &build).is_empty());
}

#[tokio::test]
async fn parents_never_run_after_children() {
  let temp = TempDir::new().unwrap();
  let root = write_range(temp.path());
  let snapshot = snapshot(&[root], "range").await;
  let plan = calculate_delta(&snapshot, None).unwrap();

  let position = |id: &str| plan.global_order.iter().position(|x| x == id).unwrap();
  for (parent, child) in snapshot.dag.edges() {
    assert!(position(&parent) < position(&child), "{parent} after {child}");
    assert!(
      plan.bucket_of(&parent) <= plan.bucket_of(&child),
      "{parent} bucketed after {child}"
    );
  }
  let mut sorted = plan.ordered_priorities.clone();
  sorted.sort();
  assert_eq!(plan.ordered_priorities, sorted);
}

#[tokio::test]
async fn first_plan_applies_every_team() {
  let temp = TempDir::new().unwrap();
  let root = write_range(temp.path());
  let paths = [root];
  let snapshot = snapshot(&paths, "range").await;
  let (_, build) = resolve(&paths, "range");

  let plan = calculate_delta(&snapshot, None).unwrap();
  let needs = calculate_terraform_needs(&plan, &build);
  assert_eq!(
    needs[TEAM],
    vec![TerraformCommand::Init, TerraformCommand::Refresh, TerraformCommand::Apply]
  );
}

#[tokio::test]
async fn changed_host_is_tainted_and_reapplied() {
  let temp = TempDir::new().unwrap();
  let root = write_range(temp.path());
  let before = snapshot(std::slice::from_ref(&root), "range").await;

  let overlay = write_file(
    temp.path(),
    "bigger.json",
    r#"{"hosts":[{"id":"db","instance_size":"xlarge"}]}"#,
  );
  let paths = [root, overlay];
  let after = snapshot(&paths, "range").await;
  let (_, build) = resolve(&paths, "range");

  let plan = calculate_delta(&after, Some(&before.to_stored())).unwrap();
  assert!(plan.task("/hosts/db").is_some());
  assert_eq!(plan.task(DB).map(|t| t.action), Some(TaskAction::Recreate));
  assert!(plan.task(WEB).is_none());

  let needs = calculate_terraform_needs(&plan, &build);
  assert_eq!(
    needs[TEAM],
    vec![
      TerraformCommand::Init,
      TerraformCommand::Refresh,
      TerraformCommand::Taint(DB.to_string()),
      TerraformCommand::Apply,
    ]
  );
}

#[tokio::test]
async fn active_connection_is_tainted_by_resource_name() {
  let temp = TempDir::new().unwrap();
  let root = write_range(temp.path());
  let before = snapshot(std::slice::from_ref(&root), "range").await;

  let overlay = write_file(
    temp.path(),
    "bigger.json",
    r#"{"hosts":[{"id":"db","instance_size":"xlarge"}]}"#,
  );
  let paths = [root, overlay];
  let after = snapshot(&paths, "range").await;
  let (_, build) = resolve(&paths, "range");

  let dir = build_dir(&temp.path().join("data"), &build.id);
  ConnectionDescriptor {
    remote_addr: "203.0.113.20".into(),
    resource_name: "aws_instance.db".into(),
    active: true,
  }
  .write(&conn_descriptor_path(&dir, &build.id, DB))
  .await
  .unwrap();

  let mut build = (*build).clone();
  assert_eq!(refresh_connections(&mut build, &dir).await.unwrap(), 1);
  let db = build.provisioned_host(DB).unwrap();
  assert!(db.connection.active);
  assert_eq!(db.connection.remote_addr, "203.0.113.20");
  assert!(!build.provisioned_host(WEB).unwrap().connection.active);

  let plan = calculate_delta(&after, Some(&before.to_stored())).unwrap();
  let needs = calculate_terraform_needs(&plan, &build);
  assert_eq!(
    needs[TEAM],
    vec![
      TerraformCommand::Init,
      TerraformCommand::Refresh,
      TerraformCommand::Taint("aws_instance.db".to_string()),
      TerraformCommand::Apply,
    ]
  );
}

#[tokio::test]
async fn dropped_host_is_reported_as_removed() {
  let temp = TempDir::new().unwrap();
  let root = write_range(temp.path());
  let before = snapshot(std::slice::from_ref(&root), "range").await;

  let narrowed = write_file(
    temp.path(),
    "narrow.json",
    r#"{"environments":[{"id":"range","networks":[{"name":"corp","hosts":["web"]}]}]}"#,
  );
  let after = snapshot(&[root, narrowed], "range").await;

  let plan = calculate_delta(&after, Some(&before.to_stored())).unwrap();
  assert!(plan.removed.contains(&DB.to_string()));
  assert!(plan.removed.contains(&format!("{DB}/steps/0-init")));
  assert!(plan.removed.contains(&"/commands/init".to_string()));
  assert!(!plan.removed.iter().any(|id| id.starts_with(WEB)));
}
