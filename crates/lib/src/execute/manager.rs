//! Worker loop driving jobs through their lifecycle.
//!
//! A [`Manager`] runs one job at a time. Parallelism comes from running several managers
//! against the same inbound channel.

use std::sync::Arc;

use tokio::sync::mpsc::{UnboundedReceiver, UnboundedSender};
use tokio::sync::{Mutex, watch};
use tracing::{Instrument, Span, debug, error, warn};

use super::job::{Doer, JobContext, drive};
use super::types::{JobAck, JobFailure};

pub type Inbound = Arc<Mutex<UnboundedReceiver<Box<dyn Doer>>>>;

pub struct Manager {
  id: usize,
  inbound: Inbound,
  shutdown: watch::Receiver<bool>,
  acks: UnboundedSender<JobAck>,
  errors: UnboundedSender<JobFailure>,
  ctx: JobContext,
  span: Span,
}

impl Manager {
  pub fn new(
    id: usize,
    inbound: Inbound,
    shutdown: watch::Receiver<bool>,
    acks: UnboundedSender<JobAck>,
    errors: UnboundedSender<JobFailure>,
    ctx: JobContext,
    span: Span,
  ) -> Self {
    Self {
      id,
      inbound,
      shutdown,
      acks,
      errors,
      ctx,
      span,
    }
  }

  /// Receive and run jobs until shutdown is signalled or the inbound channel closes.
  pub async fn run(mut self) {
    let span = self.span.clone();
    async move {
      loop {
        if *self.shutdown.borrow() {
          break;
        }
        let next = tokio::select! {
          changed = self.shutdown.changed() => {
            if changed.is_err() || *self.shutdown.borrow() {
              break;
            }
            continue;
          }
          job = recv(&self.inbound) => job,
        };
        let Some(mut job) = next else {
          break;
        };
        self.process(job.as_mut()).await;
      }
      debug!(manager = self.id, "manager stopped");
    }
    .instrument(span)
    .await
  }

  async fn process(&self, job: &mut dyn Doer) {
    let job_id = job.job_id().to_string();
    debug!(manager = self.id, job = %job_id, "job received");

    match drive(job, &self.ctx).await {
      Ok(elapsed) => {
        let ack = JobAck {
          job_id,
          status: job.status(),
          elapsed,
        };
        if self.acks.send(ack).is_err() {
          warn!(manager = self.id, "ack receiver dropped");
        }
      }
      Err(error) => {
        if error.is_timeout_extension() {
          warn!(manager = self.id, job = %job_id, error = %error, "job not ready");
        } else {
          error!(manager = self.id, job = %job_id, error = %error, "job failed");
        }
        if self.errors.send(JobFailure { job_id, error }).is_err() {
          warn!(manager = self.id, "error receiver dropped");
        }
      }
    }
  }
}

async fn recv(inbound: &Inbound) -> Option<Box<dyn Doer>> {
  inbound.lock().await.recv().await
}
