//! Types for plan execution.
//!
//! Error, configuration and result types shared by the jobs, the collaborators they
//! drive and the bucketed executor.

use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use super::job::{JobError, JobStatus};

/// Errors raised by actions: local processes, remote collaborators, descriptors.
#[derive(Debug, Error)]
pub enum ExecuteError {
  /// Command exited unsuccessfully.
  #[error("command failed with exit code {code:?}: {cmd}")]
  CmdFailed { cmd: String, code: Option<i32> },

  /// Command did not finish in time.
  #[error("command timed out after {}s: {cmd}", .after.as_secs())]
  Timeout { cmd: String, after: Duration },

  /// I/O error during execution.
  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  /// A local asset a job needs is gone.
  #[error("asset not found: {}", .0.display())]
  MissingAsset(PathBuf),

  /// A file mode that is not an octal permission string.
  #[error("invalid file mode {0:?}")]
  InvalidPerms(String),

  /// Connection descriptor exists but cannot be parsed.
  #[error("invalid connection descriptor {}: {source}", path.display())]
  Descriptor {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  /// Every manager stopped while jobs were still outstanding.
  #[error("job workers exited with {outstanding} job(s) outstanding")]
  WorkersLost { outstanding: usize },
}

/// Configuration for plan execution.
#[derive(Debug, Clone)]
pub struct ExecuteConfig {
  /// Number of managers pulling from the job channel.
  pub parallelism: usize,

  /// Shell used for local commands.
  /// If None, uses /bin/sh (Unix) or powershell.exe (Windows).
  pub shell: Option<String>,

  /// Terraform binary run in each team directory.
  pub terraform_bin: String,

  /// Sleep for a step's cooldown after it runs.
  pub honor_cooldowns: bool,

  /// Key used for SSH connections. Defaults to `{build_dir}/id_rsa`.
  pub identity_file: Option<PathBuf>,
}

impl Default for ExecuteConfig {
  fn default() -> Self {
    Self {
      parallelism: num_cpus(),
      shell: None,
      terraform_bin: "terraform".to_string(),
      honor_cooldowns: true,
      identity_file: None,
    }
  }
}

/// Get the number of CPUs for default parallelism.
fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}

/// A job that finished successfully.
#[derive(Debug, Clone, Serialize)]
pub struct JobAck {
  pub job_id: String,
  pub status: JobStatus,
  #[serde(with = "duration_ms")]
  pub elapsed: Duration,
}

/// A job that did not.
#[derive(Debug)]
pub struct JobFailure {
  pub job_id: String,
  pub error: JobError,
}

impl JobFailure {
  /// The job asked to be retried later rather than failing outright.
  pub fn is_soft(&self) -> bool {
    self.error.is_timeout_extension()
  }
}

/// Outcome of running a plan.
#[derive(Debug, Default)]
pub struct ExecutionReport {
  pub succeeded: Vec<JobAck>,
  pub failed: Vec<JobFailure>,
  /// Jobs never started: disabled provisioners and everything after a failed bucket.
  pub skipped: Vec<String>,
  pub buckets_completed: usize,
}

impl ExecutionReport {
  pub fn is_success(&self) -> bool {
    self.failed.is_empty()
  }

  pub fn total(&self) -> usize {
    self.succeeded.len() + self.failed.len() + self.skipped.len()
  }
}

mod duration_ms {
  use std::time::Duration;

  use serde::Serializer;

  pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(value.as_millis() as u64)
  }
}
