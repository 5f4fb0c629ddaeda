//! Implementation of the `rangeforge run` command.
//!
//! Builds the live snapshot, executes the plan against the stored one and stores the
//! live snapshot once every job succeeded. A failed run leaves the stored snapshot alone,
//! so the next run plans the same work again.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Args;
use serde_json::json;
use tracing::info_span;

use rangeforge_lib::execute::{ExecuteConfig, JobContext, LocalExecutor, ZoneFileRegistrar, execute_plan};
use rangeforge_lib::platform::paths::build_dir;
use rangeforge_lib::plan::calculate_delta;
use rangeforge_lib::snapshot::SnapshotStore;

use super::plan::print_plan;
use super::{live_snapshot, load_target, runtime, stored_snapshot};
use crate::Target;
use crate::output::{Mark, OutputFormat, elapsed, mark, print_json};

#[derive(Args, Debug, Clone)]
pub struct RunOptions {
  /// Number of concurrent workers (default: available CPUs)
  #[arg(short = 'j', long)]
  pub parallelism: Option<usize>,

  /// Terraform binary run in each team directory
  #[arg(long, default_value = "terraform")]
  pub terraform: String,

  /// SSH key used for host connections (default: <build dir>/id_rsa)
  #[arg(long)]
  pub identity: Option<PathBuf>,

  /// Do not sleep for step cooldowns
  #[arg(long)]
  pub no_cooldowns: bool,

  /// Shell for single-line commands
  #[arg(long)]
  pub shell: Option<String>,

  /// Directory standing in for host filesystems (default: <build dir>/hosts)
  #[arg(long)]
  pub hosts_dir: Option<PathBuf>,

  /// Directory zone files are written to (default: <build dir>/zones)
  #[arg(long)]
  pub zones_dir: Option<PathBuf>,
}

impl RunOptions {
  fn config(&self) -> ExecuteConfig {
    let mut config = ExecuteConfig {
      terraform_bin: self.terraform.clone(),
      honor_cooldowns: !self.no_cooldowns,
      identity_file: self.identity.clone(),
      shell: self.shell.clone(),
      ..Default::default()
    };
    if let Some(parallelism) = self.parallelism {
      config.parallelism = parallelism;
    }
    config
  }
}

pub fn cmd_run(target: &Target, data_dir: &Path, options: &RunOptions, output: OutputFormat) -> Result<()> {
  let loaded = load_target(target)?;
  let rt = runtime()?;
  let live = rt.block_on(live_snapshot(&loaded))?;
  let stored = stored_snapshot(data_dir, &live.build_id)?;
  let plan = calculate_delta(&live, stored.as_ref()).context("Failed to calculate plan")?;

  if plan.is_empty() && plan.removed.is_empty() {
    if output.is_json() {
      return print_json(&json!({ "build": plan.build_id, "changed": false }));
    }
    mark(Mark::Done, format!("{} is up to date", plan.build_id));
    return Ok(());
  }
  if !output.is_json() {
    print_plan(&plan);
    println!();
  }

  let build_dir = build_dir(data_dir, &live.build_id);
  std::fs::create_dir_all(&build_dir).with_context(|| format!("Failed to create {}", build_dir.display()))?;
  let hosts_dir = options.hosts_dir.clone().unwrap_or_else(|| build_dir.join("hosts"));
  let zones_dir = options.zones_dir.clone().unwrap_or_else(|| build_dir.join("zones"));
  let config = options.config();
  let ctx = JobContext {
    executor: Arc::new(LocalExecutor::new(hosts_dir).with_shell(config.shell.clone())),
    dns: Arc::new(ZoneFileRegistrar::new(zones_dir)),
    build_id: live.build_id.clone(),
    build_dir: build_dir.clone(),
    config,
  };

  let span = info_span!("run", build = %live.build_id);
  let report = rt
    .block_on(execute_plan(&plan, &live, &loaded.build, ctx, &span))
    .context("Plan execution aborted")?;

  if report.is_success() {
    let store = SnapshotStore::for_build(data_dir, &live.build_id).context("Failed to open snapshot store")?;
    store.save(&live).context("Failed to save snapshot")?;
  }

  if output.is_json() {
    let failed: Vec<_> = report
      .failed
      .iter()
      .map(|f| json!({ "job": f.job_id, "error": f.error.to_string() }))
      .collect();
    print_json(&json!({
      "build": live.build_id,
      "changed": true,
      "checksum": live.checksum,
      "succeeded": report.succeeded,
      "failed": failed,
      "skipped": report.skipped,
      "buckets_completed": report.buckets_completed,
    }))?;
  } else {
    for ack in &report.succeeded {
      mark(Mark::Done, format!("{} ({})", ack.job_id, elapsed(ack.elapsed)));
    }
    for failure in &report.failed {
      mark(Mark::Failed, format!("{}: {}", failure.job_id, failure.error));
    }
    for skipped in &report.skipped {
      mark(Mark::Skipped, format!("{skipped} skipped"));
    }
    if report.is_success() {
      mark(Mark::Note, format!("Stored snapshot {} for {}", live.checksum, live.build_id));
    }
  }

  if !report.is_success() {
    bail!("{} job(s) failed", report.failed.len());
  }
  Ok(())
}
