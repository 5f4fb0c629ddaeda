//! Implementation of the `rangeforge status` command.

use std::path::Path;

use anyhow::Result;
use serde_json::json;

use rangeforge_lib::build::expand::build_path;
use rangeforge_lib::snapshot::SnapshotStore;

use super::stored_snapshot;
use crate::output::{Mark, OutputFormat, human_size, mark, print_json, short_checksum, stat};

pub fn cmd_status(env: &str, data_dir: &Path, output: OutputFormat) -> Result<()> {
  let build_id = build_path(env);
  let path = SnapshotStore::location(data_dir, &build_id);
  let Some(stored) = stored_snapshot(data_dir, &build_id)? else {
    if output.is_json() {
      return print_json(&json!({ "build": build_id, "stored": false }));
    }
    mark(Mark::Note, format!("No stored snapshot for {build_id}"));
    return Ok(());
  };

  let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
  if output.is_json() {
    return print_json(&json!({
      "build": stored.build_id,
      "stored": true,
      "checksum": stored.checksum,
      "nodes": stored.metastore.len(),
      "edges": stored.edges.len(),
      "size_bytes": size,
      "path": path,
    }));
  }

  println!("Build: {}", stored.build_id);
  stat("Checksum", short_checksum(stored.checksum));
  stat("Nodes", stored.metastore.len());
  stat("Edges", stored.edges.len());
  stat("Size", human_size(size));
  stat("Path", path.display());
  Ok(())
}
