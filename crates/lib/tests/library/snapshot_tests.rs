//! Snapshot construction over the on-disk range fixture.

use rangeforge_lib::consts::ROOT_NODE_ID;
use rangeforge_lib::snapshot::{ObjectType, SnapshotStore};
use tempfile::TempDir;

use super::common::{DB, WEB, snapshot, snapshot_with, write_file, write_range};

const INSTANCE_TYPES: [ObjectType; 7] = [
  ObjectType::Environment,
  ObjectType::Build,
  ObjectType::Team,
  ObjectType::ProvisionedNetwork,
  ObjectType::ProvisionedHost,
  ObjectType::Connection,
  ObjectType::ProvisioningStep,
];

#[tokio::test]
async fn one_team_two_hosts_three_steps() {
  let temp = TempDir::new().unwrap();
  let root = write_range(temp.path());
  let snapshot = snapshot(&[root], "range").await;

  let counts: Vec<usize> = INSTANCE_TYPES.iter().map(|t| snapshot.count_of(*t)).collect();
  assert_eq!(counts, vec![1, 1, 1, 1, 2, 2, 6]);
  assert_eq!(counts.iter().sum::<usize>(), 14);

  // host x2, network, script, two commands, remote file
  assert_eq!(snapshot.len(), 14 + 7);

  let steps = [
    format!("{WEB}/steps/0-setup"),
    format!("{WEB}/steps/1-restart"),
    format!("{WEB}/steps/2-motd"),
  ];
  let costs: Vec<u32> = steps.iter().map(|id| snapshot.get(id).unwrap().cost()).collect();
  assert_eq!(costs, vec![20, 21, 22]);
  assert!(snapshot.dag.has_edge(WEB, &steps[0]));
  assert!(snapshot.dag.has_edge(&steps[0], &steps[1]));
  assert!(snapshot.dag.has_edge(&steps[1], &steps[2]));
  // pnet -> phost is implied by pnet -> conn -> phost
  assert!(!snapshot.dag.has_edge("/envs/range/build/teams/0/networks/corp", WEB));
  assert!(snapshot.dag.has_edge(&steps[0], "/scripts/setup"));
}

#[tokio::test]
async fn graph_is_rooted_acyclic_and_closed() {
  let temp = TempDir::new().unwrap();
  let root = write_range(temp.path());
  let snapshot = snapshot(&[root], "range").await;

  assert!(snapshot.dag.is_acyclic());
  assert!(!snapshot.dag.has_vertex(ROOT_NODE_ID));
  for (parent, child) in snapshot.dag.edges() {
    assert!(snapshot.metastore.contains_key(&parent), "dangling parent {parent}");
    assert!(snapshot.metastore.contains_key(&child), "dangling child {child}");
  }
  assert!(snapshot.parent_ids(&format!("{DB}/conn")).iter().any(|p| p.ends_with("/networks/corp")));
  assert_eq!(snapshot.parent_ids("/envs/range/build"), vec!["/envs/range".to_string()]);
}

#[tokio::test]
async fn checksum_does_not_depend_on_scheduling() {
  let temp = TempDir::new().unwrap();
  let root = write_range(temp.path());
  let paths = [root];

  let baseline = snapshot(&paths, "range").await;
  for seed in [1, 7, 42, 1337] {
    let shuffled = snapshot_with(&paths, "range", Some(seed)).await;
    assert_eq!(shuffled.checksum, baseline.checksum, "seed {seed}");
    assert_eq!(shuffled.metastore, baseline.metastore, "seed {seed}");
    assert_eq!(shuffled.dag.edges(), baseline.dag.edges(), "seed {seed}");
  }
}

#[tokio::test]
async fn empty_environment_drains() {
  let temp = TempDir::new().unwrap();
  let root = write_file(
    temp.path(),
    "empty.json",
    r#"{"environments":[{"id":"void","team_count":1}]}"#,
  );
  let snapshot = snapshot(&[root], "void").await;

  assert_eq!(snapshot.len(), 3);
  assert_eq!(snapshot.count_of(ObjectType::Team), 1);
  assert!(snapshot.dag.has_edge("/envs/void", "/envs/void/build"));
}

#[tokio::test]
async fn stored_snapshot_survives_reopen() {
  let temp = TempDir::new().unwrap();
  let root = write_range(temp.path());
  let snapshot = snapshot(&[root], "range").await;
  let data_dir = temp.path().join("data");

  let store = SnapshotStore::for_build(&data_dir, &snapshot.build_id).unwrap();
  store.save(&snapshot).unwrap();
  drop(store);

  let stored = SnapshotStore::for_build(&data_dir, &snapshot.build_id)
    .unwrap()
    .load()
    .unwrap()
    .unwrap();
  assert_eq!(stored.checksum, snapshot.checksum);
  assert_eq!(stored.metastore.len(), snapshot.len());
}
