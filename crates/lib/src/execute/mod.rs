//! Plan execution.
//!
//! A plan becomes a [`JobSet`]: per-team terraform jobs followed by one job per new or
//! changed provisioning step, grouped into the plan's priority buckets. [`execute_plan`]
//! feeds the buckets, one at a time, to a pool of [`Manager`]s sharing one inbound
//! channel. A bucket is a barrier: the next one starts only after every job of the
//! current one reported back, and not at all if any of them failed.

pub mod actions;
mod job;
mod jobs;
mod manager;
pub mod remote;
mod types;

use std::sync::Arc;

use tokio::sync::mpsc::unbounded_channel;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinSet;
use tracing::{Span, debug, error, info, info_span, warn};

use crate::build::Build;
use crate::plan::Plan;
use crate::snapshot::Snapshot;

pub use job::{Doer, GenericJob, JobContext, JobError, JobStatus, drive};
pub use jobs::{CommandJob, DnsRecordJob, JobSet, RemoteFileJob, ScriptJob, TERRAFORM_PRIORITY, TerraformJob};
pub use manager::{Inbound, Manager};
pub use remote::{
  ConnectionDescriptor, DnsRegistrar, LocalExecutor, RemoteExecutor, ZoneFileRegistrar, refresh_connections,
};
pub use types::{ExecuteConfig, ExecuteError, ExecutionReport, JobAck, JobFailure};

/// Execute `plan` against `build`.
///
/// Connection descriptors already present under the build directory are folded into the
/// build first, so terraform taints target the resources a builder reported.
///
/// Returns once every bucket ran or a bucket failed; jobs of later buckets are reported
/// as skipped. Only infrastructure errors (an unreadable descriptor, every worker gone)
/// are returned as `Err`.
pub async fn execute_plan(
  plan: &Plan,
  snapshot: &Snapshot,
  build: &Build,
  ctx: JobContext,
  span: &Span,
) -> Result<ExecutionReport, ExecuteError> {
  let mut build = build.clone();
  refresh_connections(&mut build, &ctx.build_dir).await?;
  let set = JobSet::from_plan(plan, snapshot, &build);
  let mut report = ExecutionReport {
    skipped: set.skipped.clone(),
    ..Default::default()
  };
  if set.is_empty() {
    info!(build = %plan.build_id, "nothing to execute");
    return Ok(report);
  }

  let workers = ctx.config.parallelism.max(1);
  let (job_tx, job_rx) = unbounded_channel::<Box<dyn Doer>>();
  let inbound: Inbound = Arc::new(Mutex::new(job_rx));
  let (ack_tx, mut ack_rx) = unbounded_channel();
  let (err_tx, mut err_rx) = unbounded_channel();
  let (shutdown_tx, shutdown_rx) = watch::channel(false);

  let mut managers = JoinSet::new();
  for id in 0..workers {
    let manager = Manager::new(
      id,
      inbound.clone(),
      shutdown_rx.clone(),
      ack_tx.clone(),
      err_tx.clone(),
      ctx.clone(),
      info_span!(parent: span, "manager", id),
    );
    managers.spawn(manager.run());
  }
  drop(ack_tx);
  drop(err_tx);

  let mut buckets = set.buckets.into_iter();
  let mut lost = None;
  for (priority, jobs) in buckets.by_ref() {
    debug!(priority, jobs = jobs.len(), "submitting bucket");
    let mut sent = 0usize;
    let mut unsent = 0usize;
    let mut failed = false;
    for mut job in jobs {
      if let Err(e) = job.generic_mut().transition(JobStatus::Enqueued) {
        report.failed.push(JobFailure {
          job_id: job.job_id().to_string(),
          error: e,
        });
        failed = true;
        continue;
      }
      if job_tx.send(job).is_err() {
        unsent += 1;
        continue;
      }
      sent += 1;
    }

    let mut received = 0usize;
    while received < sent {
      tokio::select! {
        Some(ack) = ack_rx.recv() => {
          report.succeeded.push(ack);
          received += 1;
        }
        Some(failure) = err_rx.recv() => {
          report.failed.push(failure);
          failed = true;
          received += 1;
        }
        else => break,
      }
    }
    if received < sent || unsent > 0 {
      lost = Some(sent - received + unsent);
      break;
    }

    if failed {
      warn!(priority, failed = report.failed.len(), "bucket failed, stopping");
      break;
    }
    report.buckets_completed += 1;
  }
  for (_, jobs) in buckets {
    report.skipped.extend(jobs.iter().map(|j| j.job_id().to_string()));
  }

  let _ = shutdown_tx.send(true);
  drop(job_tx);
  while let Some(joined) = managers.join_next().await {
    if let Err(e) = joined {
      error!(error = %e, "manager task panicked");
    }
  }

  if let Some(outstanding) = lost {
    return Err(ExecuteError::WorkersLost { outstanding });
  }

  info!(
    build = %plan.build_id,
    succeeded = report.succeeded.len(),
    failed = report.failed.len(),
    skipped = report.skipped.len(),
    buckets = report.buckets_completed,
    "plan executed"
  );
  Ok(report)
}

#[cfg(all(test, unix))]
mod tests {
  use super::*;
  use tempfile::TempDir;

  use crate::execute::job::tests::{RecordingExecutor, context};
  use crate::platform::paths::conn_descriptor_path;
  use crate::plan::calculate_delta;
  use crate::util::testutil::{pipeline, write_file, write_scenario};

  const WEB: &str = "/envs/prod/build/teams/0/networks/corp/hosts/web";
  const DB: &str = "/envs/prod/build/teams/0/networks/corp/hosts/db";

  async fn ready_context(temp: &TempDir, build: &Build, recorder: Arc<RecordingExecutor>) -> JobContext {
    let mut ctx = context(&temp.path().join("build"), recorder);
    ctx.build_id = build.id.clone();
    ctx.config.terraform_bin = "true".into();
    for phost in [WEB, DB] {
      ConnectionDescriptor {
        remote_addr: "203.0.113.7".into(),
        resource_name: String::new(),
        active: true,
      }
      .write(&conn_descriptor_path(&ctx.build_dir, &ctx.build_id, phost))
      .await
      .unwrap();
    }
    ctx
  }

  #[tokio::test]
  async fn executes_every_bucket_in_order() {
    let temp = TempDir::new().unwrap();
    let root = write_scenario(temp.path());
    let (_, build, snapshot) = pipeline(&[root], "prod").await;
    let plan = calculate_delta(&snapshot, None).unwrap();
    let recorder = Arc::new(RecordingExecutor::default());
    let ctx = ready_context(&temp, &build, recorder.clone()).await;

    let report = execute_plan(&plan, &snapshot, &build, ctx, &Span::none()).await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.succeeded.len(), 5);
    assert_eq!(report.buckets_completed, 4);
    assert!(report.skipped.is_empty());

    let calls = recorder.calls.lock().unwrap();
    let position = |needle: &str| calls.iter().position(|c| c.contains(needle)).unwrap();
    assert!(position("initdb") < position("systemctl"));
    assert!(position("setup.sh --fast") < position("systemctl"));
    assert!(position("systemctl") < position("dns www"));
  }

  #[tokio::test]
  async fn failed_bucket_skips_the_rest() {
    let temp = TempDir::new().unwrap();
    let root = write_scenario(temp.path());
    let (_, build, snapshot) = pipeline(&[root], "prod").await;
    let plan = calculate_delta(&snapshot, None).unwrap();
    let recorder = Arc::new(RecordingExecutor {
      fail_on: Some("initdb".into()),
      ..Default::default()
    });
    let ctx = ready_context(&temp, &build, recorder.clone()).await;

    let report = execute_plan(&plan, &snapshot, &build, ctx, &Span::none()).await.unwrap();
    assert!(!report.is_success());
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].job_id, format!("{DB}/steps/0-init"));
    assert_eq!(report.buckets_completed, 1);
    assert_eq!(
      report.skipped,
      vec![format!("{WEB}/steps/1-restart"), format!("{WEB}/steps/2-www")]
    );
    assert!(!recorder.calls.lock().unwrap().iter().any(|c| c.contains("systemctl")));
  }

  #[tokio::test]
  async fn empty_plan_executes_nothing() {
    let temp = TempDir::new().unwrap();
    let root = write_scenario(temp.path());
    let (_, build, snapshot) = pipeline(&[root], "prod").await;
    let plan = calculate_delta(&snapshot, Some(&snapshot.to_stored())).unwrap();
    let recorder = Arc::new(RecordingExecutor::default());
    let ctx = ready_context(&temp, &build, recorder.clone()).await;

    let report = execute_plan(&plan, &snapshot, &build, ctx, &Span::none()).await.unwrap();
    assert_eq!(report.total(), 0);
    assert!(recorder.calls.lock().unwrap().is_empty());
  }

  #[tokio::test]
  async fn terraform_taints_reported_resource() {
    use std::os::unix::fs::PermissionsExt;

    let temp = TempDir::new().unwrap();
    let root = write_scenario(temp.path());
    let (_, _, before) = pipeline(std::slice::from_ref(&root), "prod").await;
    let overlay = write_file(
      temp.path(),
      "bigger.json",
      r#"{"hosts":[{"id":"db","instance_size":"xlarge"}]}"#,
    );
    let (_, build, after) = pipeline(&[root, overlay], "prod").await;
    let plan = calculate_delta(&after, Some(&before.to_stored())).unwrap();

    let log = temp.path().join("terraform.log");
    let fake = write_file(
      temp.path(),
      "terraform.sh",
      &format!("#!/bin/sh\necho \"$@\" >> {}\n", log.display()),
    );
    std::fs::set_permissions(&fake, std::fs::Permissions::from_mode(0o755)).unwrap();

    let mut ctx = ready_context(&temp, &build, Arc::new(RecordingExecutor::default())).await;
    ctx.config.terraform_bin = fake.display().to_string();
    ConnectionDescriptor {
      remote_addr: "203.0.113.20".into(),
      resource_name: "aws_instance.db".into(),
      active: true,
    }
    .write(&conn_descriptor_path(&ctx.build_dir, &ctx.build_id, DB))
    .await
    .unwrap();

    let report = execute_plan(&plan, &after, &build, ctx, &Span::none()).await.unwrap();
    assert!(report.is_success());
    let calls = std::fs::read_to_string(&log).unwrap();
    assert_eq!(
      calls.lines().collect::<Vec<_>>(),
      vec!["init -input=false", "refresh -input=false", "taint aws_instance.db", "apply -input=false -auto-approve"]
    );
  }
}
