//! Implementation of the `rangeforge plan` command.
//!
//! Compares the live snapshot with the build's stored one and lists what would run,
//! bucket by bucket.

use std::path::Path;

use anyhow::{Context, Result};
use rangeforge_lib::plan::{Plan, calculate_delta};

use super::{live_snapshot, load_target, runtime, stored_snapshot};
use crate::Target;
use crate::output::{Mark, OutputFormat, entry, mark, print_json, stat};

pub fn cmd_plan(target: &Target, data_dir: &Path, output: OutputFormat) -> Result<()> {
  let loaded = load_target(target)?;
  let live = runtime()?.block_on(live_snapshot(&loaded))?;
  let stored = stored_snapshot(data_dir, &live.build_id)?;
  let plan = calculate_delta(&live, stored.as_ref()).context("Failed to calculate plan")?;

  if output.is_json() {
    return print_json(&plan);
  }
  print_plan(&plan);
  Ok(())
}

pub(crate) fn print_plan(plan: &Plan) {
  if plan.is_empty() && plan.removed.is_empty() {
    mark(Mark::Done, format!("{} is up to date", plan.build_id));
    return;
  }

  for priority in &plan.ordered_priorities {
    println!("Priority {priority}:");
    for task in &plan.tasks_by_priority[priority] {
      entry(task.action.into(), format!("{} ({})", task.id, task.object_type));
    }
  }
  if !plan.removed.is_empty() {
    println!("Removed:");
    for id in &plan.removed {
      entry(Mark::Removed, id);
    }
  }

  println!();
  stat("Tasks", plan.task_count());
  stat("Buckets", plan.ordered_priorities.len());
  stat("Removed", plan.removed.len());
}
