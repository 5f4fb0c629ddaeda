//! Implementation of the `rangeforge snapshot` command.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};

use rangeforge_lib::snapshot::SnapshotStore;

use super::{live_snapshot, load_target, runtime};
use crate::Target;
use crate::output::{Mark, OutputFormat, mark, print_json, stat};

pub fn cmd_snapshot(target: &Target, data_dir: &Path, save: bool, output: OutputFormat) -> Result<()> {
  let loaded = load_target(target)?;
  let snapshot = runtime()?.block_on(live_snapshot(&loaded))?;

  if save {
    let store = SnapshotStore::for_build(data_dir, &snapshot.build_id).context("Failed to open snapshot store")?;
    store.save(&snapshot).context("Failed to save snapshot")?;
    if !output.is_json() {
      mark(Mark::Note, format!("Saved to {}", store.path().display()));
    }
  }

  if output.is_json() {
    return print_json(&snapshot.to_stored());
  }

  let mut counts = BTreeMap::new();
  for meta in snapshot.metastore.values() {
    *counts.entry(meta.object_type).or_insert(0usize) += 1;
  }

  mark(Mark::Done, format!("Snapshot of {}: {}", snapshot.build_id, snapshot.checksum));
  stat("Nodes", snapshot.len());
  stat("Edges", snapshot.dag.edge_count());
  for (object_type, count) in counts {
    stat(&format!("  {object_type}"), count);
  }
  Ok(())
}
