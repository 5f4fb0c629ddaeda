use std::collections::BTreeMap;

use tracing::{debug, info};

use super::types::{Plan, PlanError, Task, TaskAction};
use crate::snapshot::{Snapshot, StoredSnapshot};

/// Diff a live snapshot against the stored one.
///
/// Per live node: equal checksum means no task, an unknown ID becomes a
/// [`TaskAction::Create`], a different checksum a [`TaskAction::Recreate`]. Tasks land
/// in the bucket of their cost. Without a stored snapshot every node is new.
pub fn calculate_delta(live: &Snapshot, stored: Option<&StoredSnapshot>) -> Result<Plan, PlanError> {
  let global_order = live.dag.topological_order()?;
  let mut tasks_by_priority: BTreeMap<u32, Vec<Task>> = BTreeMap::new();
  let mut unchanged = 0usize;

  for id in &global_order {
    let meta = live
      .get(id)
      .ok_or_else(|| PlanError::MissingMetadata(id.clone()))?;
    let previous = stored.and_then(|s| s.metastore.get(id)).map(|m| m.checksum);

    let action = match previous {
      Some(checksum) if checksum == meta.checksum => {
        unchanged += 1;
        continue;
      }
      Some(_) => TaskAction::Recreate,
      None => TaskAction::Create,
    };
    tasks_by_priority.entry(meta.cost()).or_default().push(Task {
      id: id.clone(),
      object_type: meta.object_type,
      action,
      checksum: meta.checksum,
      previous,
    });
  }

  let removed: Vec<String> = stored
    .map(|s| {
      s.metastore
        .keys()
        .filter(|id| !live.metastore.contains_key(*id))
        .cloned()
        .collect()
    })
    .unwrap_or_default();

  let ordered_priorities: Vec<u32> = tasks_by_priority.keys().copied().collect();
  let plan = Plan {
    build_id: live.build_id.clone(),
    checksum: live.checksum,
    previous_checksum: stored.map(|s| s.checksum),
    global_order,
    tasks_by_priority,
    ordered_priorities,
    removed,
  };

  for priority in &plan.ordered_priorities {
    debug!(priority, tasks = plan.tasks_by_priority[priority].len(), "plan bucket");
  }
  info!(
    build = %plan.build_id,
    tasks = plan.task_count(),
    unchanged,
    removed = plan.removed.len(),
    "plan calculated"
  );
  Ok(plan)
}
