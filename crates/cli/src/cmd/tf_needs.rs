//! Implementation of the `rangeforge tf-needs` command.

use std::path::Path;

use anyhow::{Context, Result};

use rangeforge_lib::execute::refresh_connections;
use rangeforge_lib::platform::paths::build_dir;
use rangeforge_lib::plan::{calculate_delta, calculate_terraform_needs};

use super::{live_snapshot, load_target, runtime, stored_snapshot};
use crate::Target;
use crate::output::{Mark, OutputFormat, entry, mark, print_json};

pub fn cmd_tf_needs(target: &Target, data_dir: &Path, output: OutputFormat) -> Result<()> {
  let loaded = load_target(target)?;
  let rt = runtime()?;
  let live = rt.block_on(live_snapshot(&loaded))?;
  let stored = stored_snapshot(data_dir, &live.build_id)?;
  let plan = calculate_delta(&live, stored.as_ref()).context("Failed to calculate plan")?;

  let dir = build_dir(data_dir, &live.build_id);
  let mut build = (*loaded.build).clone();
  rt.block_on(refresh_connections(&mut build, &dir))
    .context("Failed to read connection descriptors")?;
  let needs = calculate_terraform_needs(&plan, &build);

  if output.is_json() {
    return print_json(&needs);
  }
  if needs.is_empty() {
    mark(Mark::Note, "No team needs terraform");
    return Ok(());
  }
  for (team, commands) in &needs {
    println!("{team}:");
    for command in commands {
      entry(Mark::Command, command);
    }
  }
  Ok(())
}
