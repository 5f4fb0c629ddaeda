use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dag::DagError;
use crate::snapshot::ObjectType;
use crate::util::hash::Checksum;

#[derive(Debug, Error)]
pub enum PlanError {
  #[error("cannot order snapshot graph: {0}")]
  Graph(#[from] DagError),

  #[error("snapshot graph has node {0} without metadata")]
  MissingMetadata(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskAction {
  /// Not in the stored snapshot.
  Create,
  /// Stored under the same ID with a different checksum.
  Recreate,
}

impl fmt::Display for TaskAction {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      TaskAction::Create => f.write_str("create"),
      TaskAction::Recreate => f.write_str("recreate"),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
  pub id: String,
  pub object_type: ObjectType,
  pub action: TaskAction,
  pub checksum: Checksum,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub previous: Option<Checksum>,
}

/// Ordered work derived from two snapshots.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Plan {
  pub build_id: String,
  /// Checksum of the live snapshot.
  pub checksum: Checksum,
  /// Checksum of the stored snapshot, if there was one.
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub previous_checksum: Option<Checksum>,
  /// Every live node, parents before children.
  pub global_order: Vec<String>,
  /// Tasks per cost bucket; within a bucket in `global_order` order.
  pub tasks_by_priority: BTreeMap<u32, Vec<Task>>,
  /// Non-empty buckets, ascending.
  pub ordered_priorities: Vec<u32>,
  /// Stored nodes missing from the live snapshot. Reported, not scheduled.
  pub removed: Vec<String>,
}

impl Plan {
  /// No node was created or changed.
  pub fn is_empty(&self) -> bool {
    self.tasks_by_priority.values().all(Vec::is_empty)
  }

  pub fn task_count(&self) -> usize {
    self.tasks_by_priority.values().map(Vec::len).sum()
  }

  pub fn task(&self, id: &str) -> Option<&Task> {
    self.tasks().find(|t| t.id == id)
  }

  /// Tasks bucket by bucket, lowest cost first.
  pub fn tasks(&self) -> impl Iterator<Item = &Task> {
    self
      .ordered_priorities
      .iter()
      .filter_map(|p| self.tasks_by_priority.get(p))
      .flatten()
  }

  /// Index of the bucket a task lands in.
  pub fn bucket_of(&self, id: &str) -> Option<usize> {
    self.ordered_priorities.iter().position(|p| {
      self
        .tasks_by_priority
        .get(p)
        .is_some_and(|tasks| tasks.iter().any(|t| t.id == id))
    })
  }
}
