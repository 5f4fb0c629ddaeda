//! Subcommand implementations.
//!
//! Every command that works on an environment goes through [`load_target`] and
//! [`live_snapshot`], so they all see the same folded configuration and the same graph.

mod graph;
mod merge;
mod plan;
mod run;
mod snapshot;
mod status;
mod tf_needs;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info_span;

use rangeforge_lib::build::{Build, ResolvedEnvironment, materialize_build, resolve_environment};
use rangeforge_lib::load::load_layers;
use rangeforge_lib::snapshot::{Snapshot, SnapshotBuilder, SnapshotStore, StoredSnapshot};

use crate::Target;

pub use graph::cmd_graph;
pub use merge::cmd_merge;
pub use plan::cmd_plan;
pub use run::{RunOptions, cmd_run};
pub use snapshot::cmd_snapshot;
pub use status::cmd_status;
pub use tf_needs::cmd_tf_needs;

/// An environment expanded from its layer files.
pub(crate) struct Loaded {
  pub resolved: Arc<ResolvedEnvironment>,
  pub build: Arc<Build>,
}

pub(crate) fn load_target(target: &Target) -> Result<Loaded> {
  let layer = load_layers(&target.layers).context("Failed to load configuration layers")?;
  let resolved = resolve_environment(&layer, &target.env)
    .with_context(|| format!("Failed to resolve environment {}", target.env))?;
  let build = materialize_build(&resolved).with_context(|| format!("Failed to expand environment {}", target.env))?;
  Ok(Loaded {
    resolved: Arc::new(resolved),
    build: Arc::new(build),
  })
}

pub(crate) fn runtime() -> Result<tokio::runtime::Runtime> {
  tokio::runtime::Runtime::new().context("Failed to create async runtime")
}

pub(crate) async fn live_snapshot(loaded: &Loaded) -> Result<Snapshot> {
  let span = info_span!("snapshot", build = %loaded.build.id);
  SnapshotBuilder::new(span)
    .build(loaded.resolved.clone(), loaded.build.clone())
    .await
    .context("Failed to build snapshot")
}

/// The stored snapshot of `build_id`, without creating a store when there is none.
pub(crate) fn stored_snapshot(data_dir: &Path, build_id: &str) -> Result<Option<StoredSnapshot>> {
  let path = SnapshotStore::location(data_dir, build_id);
  if !path.exists() {
    return Ok(None);
  }
  let store = SnapshotStore::open(&path).with_context(|| format!("Failed to open {}", path.display()))?;
  store.load().context("Failed to load stored snapshot")
}
