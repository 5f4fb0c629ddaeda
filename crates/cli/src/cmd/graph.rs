//! Implementation of the `rangeforge graph` command.

use std::fmt::Write;

use anyhow::Result;

use rangeforge_lib::snapshot::Snapshot;

use super::{live_snapshot, load_target, runtime};
use crate::Target;

pub fn cmd_graph(target: &Target) -> Result<()> {
  let loaded = load_target(target)?;
  let snapshot = runtime()?.block_on(live_snapshot(&loaded))?;
  print!("{}", to_dot(&snapshot));
  Ok(())
}

/// Render the snapshot graph in Graphviz DOT, one node per metadata entry.
fn to_dot(snapshot: &Snapshot) -> String {
  let mut dot = String::new();
  let _ = writeln!(dot, "digraph {:?} {{", snapshot.build_id);
  let _ = writeln!(dot, "  rankdir=LR;");
  let _ = writeln!(dot, "  node [shape=box];");
  for meta in snapshot.metastore.values() {
    let _ = writeln!(
      dot,
      "  {:?} [label={:?}];",
      meta.id,
      format!("{}\n{} cost={}", meta.id, meta.object_type, meta.cost())
    );
  }
  for (parent, child) in snapshot.dag.edges() {
    let _ = writeln!(dot, "  {parent:?} -> {child:?};");
  }
  dot.push_str("}\n");
  dot
}
