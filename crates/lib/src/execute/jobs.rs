//! Concrete jobs and the job set built from a plan.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use super::actions::execute_program;
use super::job::{Doer, GenericJob, JobContext, JobError};
use super::remote::ConnectionDescriptor;
use super::types::ExecuteError;
use crate::build::{Build, Connection, Provisioner};
use crate::config::{Command, DnsRecord, RemoteFile, Script};
use crate::consts::IDENTITY_FILE_PLACEHOLDER;
use crate::plan::{Plan, TerraformCommand, calculate_terraform_needs};
use crate::platform::paths::{conn_descriptor_path, team_dir};
use crate::snapshot::{ObjectType, Snapshot};

/// Bucket terraform jobs run in, ahead of every step.
pub const TERRAFORM_PRIORITY: u32 = 0;

fn exec_err(job: &str) -> impl FnOnce(ExecuteError) -> JobError + '_ {
  move |source| JobError::Exec {
    job: job.to_string(),
    source,
  }
}

fn seconds(value: u64) -> Option<Duration> {
  (value > 0).then(|| Duration::from_secs(value))
}

/// Wait for the builder to report the host reachable, then adopt what it discovered.
async fn await_connection(job: &str, conn: &mut Connection, ctx: &JobContext) -> Result<(), JobError> {
  let path = conn_descriptor_path(&ctx.build_dir, &ctx.build_id, &conn.provisioned_host_id);
  match ConnectionDescriptor::read(&path).await.map_err(exec_err(job))? {
    None => Err(JobError::NotReady {
      job: job.to_string(),
      reason: format!("no connection descriptor at {}", path.display()),
    }),
    Some(descriptor) if !descriptor.active => Err(JobError::NotReady {
      job: job.to_string(),
      reason: format!("connection {} is not active", conn.id),
    }),
    Some(descriptor) => {
      descriptor.apply_to(conn);
      debug!(job, addr = %conn.target_addr(), "connection ready");
      Ok(())
    }
  }
}

/// Replace the identity placeholder in the connection and in `args`.
fn resolve_identity(conn: &mut Connection, args: &mut [String], ctx: &JobContext) {
  let identity = ctx.identity_file().display().to_string();
  if let Some(ssh) = conn.ssh.as_mut()
    && ssh.identity_file == IDENTITY_FILE_PLACEHOLDER
  {
    ssh.identity_file = identity.clone();
  }
  for arg in args.iter_mut() {
    if arg.contains(IDENTITY_FILE_PLACEHOLDER) {
      *arg = arg.replace(IDENTITY_FILE_PLACEHOLDER, &identity);
    }
  }
}

async fn cooldown(job: &str, seconds: u64, ctx: &JobContext) {
  if seconds == 0 || !ctx.config.honor_cooldowns {
    return;
  }
  debug!(job, seconds, "cooling down");
  tokio::time::sleep(Duration::from_secs(seconds)).await;
}

fn local_asset(job: &str, abs_path: Option<&Path>, what: &str) -> Result<(), JobError> {
  match abs_path {
    Some(path) if path.exists() => Ok(()),
    Some(path) => Err(JobError::MissingDependency {
      job: job.to_string(),
      what: format!("{what} {}", path.display()),
    }),
    None => Err(JobError::MissingDependency {
      job: job.to_string(),
      what: format!("{what} (source was never resolved)"),
    }),
  }
}

pub struct CommandJob {
  generic: GenericJob,
  command: Command,
  args: Vec<String>,
  connection: Connection,
}

impl CommandJob {
  pub fn new(generic: GenericJob, command: Command, connection: Connection) -> Self {
    let args = command.args.clone();
    Self {
      generic,
      command,
      args,
      connection,
    }
  }
}

#[async_trait]
impl Doer for CommandJob {
  fn generic(&self) -> &GenericJob {
    &self.generic
  }

  fn generic_mut(&mut self) -> &mut GenericJob {
    &mut self.generic
  }

  async fn can_proceed(&mut self, ctx: &JobContext) -> Result<(), JobError> {
    await_connection(&self.generic.job_id, &mut self.connection, ctx).await
  }

  async fn ensure_dependencies(&mut self, ctx: &JobContext) -> Result<(), JobError> {
    resolve_identity(&mut self.connection, &mut self.args, ctx);
    Ok(())
  }

  async fn run(&mut self, ctx: &JobContext) -> Result<(), JobError> {
    let result = ctx
      .executor
      .exec(
        &self.connection,
        &self.command.program,
        &self.args,
        &self.command.vars,
        seconds(self.command.timeout),
      )
      .await;
    match result {
      Ok(_) => Ok(()),
      Err(e) if self.command.ignore_errors => {
        warn!(job = %self.generic.job_id, error = %e, "command failed, ignoring");
        Ok(())
      }
      Err(e) => Err(exec_err(&self.generic.job_id)(e)),
    }
  }

  async fn clean_up(&mut self, ctx: &JobContext) -> Result<(), JobError> {
    cooldown(&self.generic.job_id, self.command.cooldown, ctx).await;
    Ok(())
  }
}

pub struct ScriptJob {
  generic: GenericJob,
  script: Script,
  args: Vec<String>,
  connection: Connection,
}

impl ScriptJob {
  pub fn new(generic: GenericJob, script: Script, connection: Connection) -> Self {
    let args = script.args.clone();
    Self {
      generic,
      script,
      args,
      connection,
    }
  }

  /// Where the script is placed on the host.
  fn remote_path(&self) -> String {
    let file_name = Path::new(&self.script.source)
      .file_name()
      .map(|n| n.to_string_lossy().into_owned())
      .unwrap_or_else(|| self.script.id.clone());
    format!("/tmp/rangeforge/scripts/{}/{}", self.script.id, file_name)
  }

  fn invocation(&self, path: String) -> (String, Vec<String>) {
    let interpreter = self.script.interpreter().to_string();
    let mut args = if interpreter == "powershell" {
      vec!["-NoProfile".into(), "-ExecutionPolicy".into(), "Bypass".into(), "-File".into(), path]
    } else {
      vec![path]
    };
    args.extend(self.args.iter().cloned());
    (interpreter, args)
  }
}

#[async_trait]
impl Doer for ScriptJob {
  fn generic(&self) -> &GenericJob {
    &self.generic
  }

  fn generic_mut(&mut self) -> &mut GenericJob {
    &mut self.generic
  }

  async fn can_proceed(&mut self, ctx: &JobContext) -> Result<(), JobError> {
    await_connection(&self.generic.job_id, &mut self.connection, ctx).await
  }

  async fn ensure_dependencies(&mut self, ctx: &JobContext) -> Result<(), JobError> {
    resolve_identity(&mut self.connection, &mut self.args, ctx);
    if self.script.is_local() {
      local_asset(&self.generic.job_id, self.script.abs_path.as_deref(), "script")?;
    }
    Ok(())
  }

  async fn run(&mut self, ctx: &JobContext) -> Result<(), JobError> {
    let job = self.generic.job_id.clone();
    let remote_path = self.remote_path();

    let staged = match (&self.script.abs_path, self.script.is_local()) {
      (Some(local), true) => ctx.executor.upload(&self.connection, local, &remote_path, "0755").await,
      _ => ctx
        .executor
        .exec(
          &self.connection,
          "curl",
          &["-fsSL".into(), "-o".into(), remote_path.clone(), self.script.source.clone()],
          &BTreeMap::new(),
          seconds(self.script.timeout),
        )
        .await
        .map(|_| ()),
    };
    staged.map_err(exec_err(&job))?;

    let (program, args) = self.invocation(remote_path);
    let result = ctx
      .executor
      .exec(&self.connection, &program, &args, &self.script.vars, seconds(self.script.timeout))
      .await;
    match result {
      Ok(_) => Ok(()),
      Err(e) if self.script.ignore_errors => {
        warn!(job = %job, error = %e, "script failed, ignoring");
        Ok(())
      }
      Err(e) => Err(exec_err(&job)(e)),
    }
  }

  async fn clean_up(&mut self, ctx: &JobContext) -> Result<(), JobError> {
    cooldown(&self.generic.job_id, self.script.cooldown, ctx).await;
    Ok(())
  }
}

pub struct RemoteFileJob {
  generic: GenericJob,
  file: RemoteFile,
  connection: Connection,
}

impl RemoteFileJob {
  pub fn new(generic: GenericJob, file: RemoteFile, connection: Connection) -> Self {
    Self {
      generic,
      file,
      connection,
    }
  }
}

#[async_trait]
impl Doer for RemoteFileJob {
  fn generic(&self) -> &GenericJob {
    &self.generic
  }

  fn generic_mut(&mut self) -> &mut GenericJob {
    &mut self.generic
  }

  async fn can_proceed(&mut self, ctx: &JobContext) -> Result<(), JobError> {
    await_connection(&self.generic.job_id, &mut self.connection, ctx).await
  }

  async fn ensure_dependencies(&mut self, ctx: &JobContext) -> Result<(), JobError> {
    resolve_identity(&mut self.connection, &mut [], ctx);
    if self.file.is_local() {
      local_asset(&self.generic.job_id, self.file.abs_path.as_deref(), "file")?;
    }
    Ok(())
  }

  async fn run(&mut self, ctx: &JobContext) -> Result<(), JobError> {
    let job = self.generic.job_id.clone();
    let result = match (&self.file.abs_path, self.file.is_local()) {
      (Some(local), true) => {
        ctx
          .executor
          .upload(&self.connection, local, &self.file.destination, &self.file.perms)
          .await
      }
      _ => ctx
        .executor
        .exec(
          &self.connection,
          "curl",
          &[
            "-fsSL".into(),
            "-o".into(),
            self.file.destination.clone(),
            self.file.source.clone(),
          ],
          &BTreeMap::new(),
          None,
        )
        .await
        .map(|_| ()),
    };
    result.map_err(exec_err(&job))
  }
}

pub struct DnsRecordJob {
  generic: GenericJob,
  record: DnsRecord,
}

impl DnsRecordJob {
  pub fn new(generic: GenericJob, record: DnsRecord) -> Self {
    Self { generic, record }
  }
}

#[async_trait]
impl Doer for DnsRecordJob {
  fn generic(&self) -> &GenericJob {
    &self.generic
  }

  fn generic_mut(&mut self) -> &mut GenericJob {
    &mut self.generic
  }

  async fn can_proceed(&mut self, _ctx: &JobContext) -> Result<(), JobError> {
    if self.record.values.is_empty() {
      return Err(JobError::MissingDependency {
        job: self.generic.job_id.clone(),
        what: "record values".into(),
      });
    }
    Ok(())
  }

  async fn run(&mut self, ctx: &JobContext) -> Result<(), JobError> {
    ctx
      .dns
      .register(&self.record)
      .await
      .map_err(exec_err(&self.generic.job_id))
  }
}

/// Runs a team's terraform commands in its working directory.
pub struct TerraformJob {
  generic: GenericJob,
  team_number: u32,
  commands: Vec<TerraformCommand>,
}

impl TerraformJob {
  pub fn new(generic: GenericJob, team_number: u32, commands: Vec<TerraformCommand>) -> Self {
    Self {
      generic,
      team_number,
      commands,
    }
  }

  pub fn commands(&self) -> &[TerraformCommand] {
    &self.commands
  }
}

#[async_trait]
impl Doer for TerraformJob {
  fn generic(&self) -> &GenericJob {
    &self.generic
  }

  fn generic_mut(&mut self) -> &mut GenericJob {
    &mut self.generic
  }

  async fn can_proceed(&mut self, _ctx: &JobContext) -> Result<(), JobError> {
    Ok(())
  }

  async fn ensure_dependencies(&mut self, ctx: &JobContext) -> Result<(), JobError> {
    let dir = team_dir(&ctx.build_dir, self.team_number);
    tokio::fs::create_dir_all(&dir)
      .await
      .map_err(|e| exec_err(&self.generic.job_id)(e.into()))
  }

  async fn run(&mut self, ctx: &JobContext) -> Result<(), JobError> {
    let dir = team_dir(&ctx.build_dir, self.team_number);
    for command in &self.commands {
      info!(job = %self.generic.job_id, command = %command, "terraform");
      execute_program(&ctx.config.terraform_bin, &command.args(), &BTreeMap::new(), &dir, None)
        .await
        .map_err(exec_err(&self.generic.job_id))?;
    }
    Ok(())
  }
}

/// Jobs for a plan, grouped into the buckets they run in.
#[derive(Default)]
pub struct JobSet {
  /// `(priority, jobs)` in ascending priority.
  pub buckets: Vec<(u32, Vec<Box<dyn Doer>>)>,
  /// Step IDs whose provisioner is disabled.
  pub skipped: Vec<String>,
}

impl JobSet {
  /// One terraform job per team that needs one, then one job per new or changed step.
  ///
  /// Parent and child job IDs mirror the snapshot edges between step jobs; a team's
  /// terraform job is the parent of that team's steps that have no step parent.
  pub fn from_plan(plan: &Plan, snapshot: &Snapshot, build: &Build) -> Self {
    let offsets: HashMap<&str, usize> = plan
      .global_order
      .iter()
      .enumerate()
      .map(|(i, id)| (id.as_str(), i))
      .collect();
    let mut set = JobSet::default();

    let needs = calculate_terraform_needs(plan, build);
    let mut terraform: Vec<GenericJob> = Vec::new();
    let mut terraform_specs: Vec<(u32, Vec<TerraformCommand>)> = Vec::new();
    for (team_id, commands) in needs {
      let Some(team) = build.teams.values().find(|t| t.id == team_id) else {
        continue;
      };
      let offset = offsets.get(team_id.as_str()).copied().unwrap_or(0);
      terraform.push(GenericJob::new(format!("{team_id}/terraform"), offset));
      terraform_specs.push((team.team_number, commands));
    }

    let mut steps: Vec<(u32, GenericJob, Provisioner, Connection)> = Vec::new();
    for task in plan.tasks() {
      if task.object_type != ObjectType::ProvisioningStep {
        continue;
      }
      let Some((phost, step)) = build.provisioning_step(&task.id) else {
        warn!(step = %task.id, "planned step missing from build");
        continue;
      };
      if step.provisioner.is_disabled() {
        debug!(step = %task.id, "provisioner disabled, skipping");
        set.skipped.push(task.id.clone());
        continue;
      }
      let offset = offsets.get(task.id.as_str()).copied().unwrap_or(0);
      let priority = snapshot
        .get(&task.id)
        .map(|m| m.cost())
        .unwrap_or_else(|| ObjectType::ProvisioningStep.cost(Some(step.step_number)));
      steps.push((
        priority,
        GenericJob::new(&task.id, offset),
        step.provisioner.clone(),
        phost.connection.clone(),
      ));
    }

    // Relations between step jobs, then from terraform jobs to the first step of each host.
    let step_ids: HashSet<String> = steps.iter().map(|(_, g, _, _)| g.job_id.clone()).collect();
    for (_, generic, _, _) in steps.iter_mut() {
      generic.parent_job_ids = snapshot
        .parent_ids(&generic.job_id)
        .into_iter()
        .filter(|id| step_ids.contains(id))
        .collect();
      generic.child_job_ids = snapshot
        .dependency_ids(&generic.job_id)
        .into_iter()
        .filter(|id| step_ids.contains(id))
        .collect();
    }
    for tf in terraform.iter_mut() {
      let team_prefix = format!("{}/", tf.job_id.trim_end_matches("/terraform"));
      for (_, generic, _, _) in steps.iter_mut() {
        if generic.parent_job_ids.is_empty() && generic.job_id.starts_with(&team_prefix) {
          generic.parent_job_ids.push(tf.job_id.clone());
          tf.child_job_ids.push(generic.job_id.clone());
        }
      }
    }

    if !terraform.is_empty() {
      let jobs: Vec<Box<dyn Doer>> = terraform
        .into_iter()
        .zip(terraform_specs)
        .map(|(generic, (team_number, commands))| {
          Box::new(TerraformJob::new(generic, team_number, commands)) as Box<dyn Doer>
        })
        .collect();
      set.buckets.push((TERRAFORM_PRIORITY, jobs));
    }

    let mut by_priority: BTreeMap<u32, Vec<Box<dyn Doer>>> = BTreeMap::new();
    for (priority, generic, provisioner, connection) in steps {
      let job: Box<dyn Doer> = match provisioner {
        Provisioner::Command(command) => Box::new(CommandJob::new(generic, command, connection)),
        Provisioner::Script(script) => Box::new(ScriptJob::new(generic, script, connection)),
        Provisioner::RemoteFile(file) => Box::new(RemoteFileJob::new(generic, file, connection)),
        Provisioner::DnsRecord(record) => Box::new(DnsRecordJob::new(generic, record)),
      };
      by_priority.entry(priority).or_default().push(job);
    }
    set.buckets.extend(by_priority);

    info!(
      buckets = set.buckets.len(),
      jobs = set.len(),
      skipped = set.skipped.len(),
      "job set built"
    );
    set
  }

  pub fn len(&self) -> usize {
    self.buckets.iter().map(|(_, jobs)| jobs.len()).sum()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn job_ids(&self) -> Vec<String> {
    self
      .buckets
      .iter()
      .flat_map(|(_, jobs)| jobs.iter().map(|j| j.job_id().to_string()))
      .collect()
  }

  pub fn find(&self, id: &str) -> Option<&dyn Doer> {
    self
      .buckets
      .iter()
      .flat_map(|(_, jobs)| jobs.iter())
      .find(|j| j.job_id() == id)
      .map(|j| j.as_ref())
  }
}
