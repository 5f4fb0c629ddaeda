//! The job lifecycle.
//!
//! Every executable node of a plan becomes a [`Doer`]. A job moves through
//!
//! ```text
//! Planned -> Enqueued -> InProgress -> Successful
//!                                   \-> Failed
//! ```
//!
//! and, once in progress, runs `can_proceed`, `ensure_dependencies`, `run`, `clean_up` and
//! `finish` strictly in that order. The first error stops the sequence and fails the job.

use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Instant, SystemTime};

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, info};

use super::remote::{DnsRegistrar, RemoteExecutor};
use super::types::{ExecuteConfig, ExecuteError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
  Planned,
  Enqueued,
  InProgress,
  Failed,
  Successful,
}

impl JobStatus {
  pub fn is_terminal(&self) -> bool {
    matches!(self, JobStatus::Failed | JobStatus::Successful)
  }

  /// Whether `self -> next` is a legal step of the lifecycle.
  pub fn can_transition_to(&self, next: JobStatus) -> bool {
    matches!(
      (self, next),
      (JobStatus::Planned, JobStatus::Enqueued)
        | (JobStatus::Enqueued, JobStatus::InProgress)
        | (JobStatus::InProgress, JobStatus::Successful)
        | (JobStatus::Planned | JobStatus::Enqueued | JobStatus::InProgress, JobStatus::Failed)
    )
  }
}

impl fmt::Display for JobStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let s = match self {
      JobStatus::Planned => "planned",
      JobStatus::Enqueued => "enqueued",
      JobStatus::InProgress => "in_progress",
      JobStatus::Failed => "failed",
      JobStatus::Successful => "successful",
    };
    f.write_str(s)
  }
}

#[derive(Debug, Error)]
pub enum JobError {
  /// A prerequisite is not there yet; the job may succeed if retried later.
  #[error("{job} is not ready: {reason}")]
  NotReady { job: String, reason: String },

  #[error("{job} is missing {what}")]
  MissingDependency { job: String, what: String },

  #[error("{job} failed: {source}")]
  Exec {
    job: String,
    #[source]
    source: ExecuteError,
  },

  #[error("{job} cannot move from {from} to {to}")]
  InvalidTransition { job: String, from: JobStatus, to: JobStatus },
}

impl JobError {
  /// Soft failure: "retry later" rather than "abort".
  pub fn is_timeout_extension(&self) -> bool {
    matches!(self, JobError::NotReady { .. })
  }

  pub fn job_id(&self) -> &str {
    match self {
      JobError::NotReady { job, .. }
      | JobError::MissingDependency { job, .. }
      | JobError::Exec { job, .. }
      | JobError::InvalidTransition { job, .. } => job,
    }
  }
}

/// State every job carries.
#[derive(Debug, Clone)]
pub struct GenericJob {
  pub job_id: String,
  /// Position of the job in the plan's global order.
  pub offset: usize,
  status: JobStatus,
  pub parent_job_ids: Vec<String>,
  pub child_job_ids: Vec<String>,
  pub created_at: SystemTime,
  pub enqueued_at: Option<SystemTime>,
  pub started_at: Option<SystemTime>,
  pub finished_at: Option<SystemTime>,
  pub error: Option<String>,
}

impl GenericJob {
  pub fn new(job_id: impl Into<String>, offset: usize) -> Self {
    Self {
      job_id: job_id.into(),
      offset,
      status: JobStatus::Planned,
      parent_job_ids: Vec::new(),
      child_job_ids: Vec::new(),
      created_at: SystemTime::now(),
      enqueued_at: None,
      started_at: None,
      finished_at: None,
      error: None,
    }
  }

  pub fn status(&self) -> JobStatus {
    self.status
  }

  pub fn transition(&mut self, to: JobStatus) -> Result<(), JobError> {
    if !self.status.can_transition_to(to) {
      return Err(JobError::InvalidTransition {
        job: self.job_id.clone(),
        from: self.status,
        to,
      });
    }
    let now = SystemTime::now();
    match to {
      JobStatus::Enqueued => self.enqueued_at = Some(now),
      JobStatus::InProgress => self.started_at = Some(now),
      JobStatus::Failed | JobStatus::Successful => self.finished_at = Some(now),
      JobStatus::Planned => {}
    }
    debug!(job = %self.job_id, from = %self.status, to = %to, "job transition");
    self.status = to;
    Ok(())
  }

  /// Mark the job failed, recording why. Terminal jobs are left alone.
  pub fn fail(&mut self, error: &JobError) {
    if self.status.is_terminal() {
      return;
    }
    self.error = Some(error.to_string());
    self.status = JobStatus::Failed;
    self.finished_at = Some(SystemTime::now());
  }
}

/// Everything a job may touch while running.
#[derive(Clone)]
pub struct JobContext {
  pub executor: Arc<dyn RemoteExecutor>,
  pub dns: Arc<dyn DnsRegistrar>,
  pub build_id: String,
  /// `{data_dir}/builds/<build-slug>`
  pub build_dir: PathBuf,
  pub config: ExecuteConfig,
}

impl JobContext {
  /// SSH key substituted for the identity placeholder.
  pub fn identity_file(&self) -> PathBuf {
    let path = self
      .config
      .identity_file
      .clone()
      .unwrap_or_else(|| self.build_dir.join("id_rsa"));
    dunce::canonicalize(&path).unwrap_or(path)
  }
}

/// An executable unit of a plan.
#[async_trait]
pub trait Doer: Send + Sync {
  fn generic(&self) -> &GenericJob;

  fn generic_mut(&mut self) -> &mut GenericJob;

  fn job_id(&self) -> &str {
    &self.generic().job_id
  }

  fn status(&self) -> JobStatus {
    self.generic().status()
  }

  /// Check hard prerequisites. May return [`JobError::NotReady`].
  async fn can_proceed(&mut self, ctx: &JobContext) -> Result<(), JobError>;

  /// Verify or repair soft dependencies.
  async fn ensure_dependencies(&mut self, _ctx: &JobContext) -> Result<(), JobError> {
    Ok(())
  }

  /// The side effect.
  async fn run(&mut self, ctx: &JobContext) -> Result<(), JobError>;

  /// Best-effort work after `run`, e.g. waiting out a cooldown.
  async fn clean_up(&mut self, _ctx: &JobContext) -> Result<(), JobError> {
    Ok(())
  }

  async fn finish(&mut self, _ctx: &JobContext) -> Result<(), JobError> {
    info!(job = %self.job_id(), "job finished");
    self.generic_mut().transition(JobStatus::Successful)
  }
}

/// Run the whole lifecycle of an enqueued job.
pub async fn drive(job: &mut dyn Doer, ctx: &JobContext) -> Result<std::time::Duration, JobError> {
  let started = Instant::now();
  let result = async {
    job.generic_mut().transition(JobStatus::InProgress)?;
    job.can_proceed(ctx).await?;
    job.ensure_dependencies(ctx).await?;
    job.run(ctx).await?;
    job.clean_up(ctx).await?;
    job.finish(ctx).await
  }
  .await;

  match result {
    Ok(()) => Ok(started.elapsed()),
    Err(e) => {
      job.generic_mut().fail(&e);
      Err(e)
    }
  }
}
