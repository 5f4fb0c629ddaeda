use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::types::{Plan, Task, TaskAction};
use crate::build::Build;
use crate::snapshot::ObjectType;

/// One terraform invocation in a team's working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "command", content = "resource", rename_all = "snake_case")]
pub enum TerraformCommand {
  Init,
  Refresh,
  Taint(String),
  Apply,
}

impl TerraformCommand {
  /// Arguments after the terraform binary.
  pub fn args(&self) -> Vec<String> {
    match self {
      TerraformCommand::Init => vec!["init".into(), "-input=false".into()],
      TerraformCommand::Refresh => vec!["refresh".into(), "-input=false".into()],
      TerraformCommand::Taint(resource) => vec!["taint".into(), resource.clone()],
      TerraformCommand::Apply => vec!["apply".into(), "-input=false".into(), "-auto-approve".into()],
    }
  }
}

impl fmt::Display for TerraformCommand {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "terraform {}", self.args().join(" "))
  }
}

#[derive(Debug, Default)]
struct TeamNeeds {
  taints: Vec<String>,
  infrastructure_changed: bool,
}

/// Terraform commands each affected team needs for `plan`, keyed by team ID.
///
/// Walks `global_order` looking at tasks for environments, builds, teams, provisioned
/// networks and provisioned hosts. Environment or build tasks affect every team.
/// A recreated provisioned host is tainted: by the resource name of its connection once
/// that connection is active, otherwise by its own planned ID. A team gets `init`,
/// `refresh`, its taints and a trailing `apply` when anything was tainted or one of its
/// infrastructure objects is new or changed.
pub fn calculate_terraform_needs(plan: &Plan, build: &Build) -> BTreeMap<String, Vec<TerraformCommand>> {
  let mut needs: BTreeMap<String, TeamNeeds> = BTreeMap::new();
  let tasks: HashMap<&str, &Task> = plan.tasks().map(|t| (t.id.as_str(), t)).collect();

  for id in &plan.global_order {
    let Some(task) = tasks.get(id.as_str()) else {
      continue;
    };

    match task.object_type {
      ObjectType::Environment | ObjectType::Build => {
        for team in build.teams.values() {
          needs.entry(team.id.clone()).or_default().infrastructure_changed = true;
        }
      }
      ObjectType::Team | ObjectType::ProvisionedNetwork => {
        let Some(team) = build.team_of(id) else {
          warn!(id = %id, "planned object outside any team");
          continue;
        };
        needs.entry(team.id.clone()).or_default().infrastructure_changed = true;
      }
      ObjectType::ProvisionedHost => {
        let (Some(team), Some(phost)) = (build.team_of(id), build.provisioned_host(id)) else {
          warn!(id = %id, "planned provisioned host missing from build");
          continue;
        };
        let entry = needs.entry(team.id.clone()).or_default();
        entry.infrastructure_changed = true;
        if task.action == TaskAction::Recreate {
          let conn = &phost.connection;
          let resource = if conn.active && !conn.resource_name.is_empty() {
            conn.resource_name.clone()
          } else {
            phost.id.clone()
          };
          debug!(host = %phost.id, resource = %resource, "taint");
          entry.taints.push(resource);
        }
      }
      _ => {}
    }
  }

  needs
    .into_iter()
    .map(|(team_id, team)| {
      let mut commands = vec![TerraformCommand::Init, TerraformCommand::Refresh];
      let mut seen: BTreeSet<&String> = BTreeSet::new();
      for resource in &team.taints {
        if seen.insert(resource) {
          commands.push(TerraformCommand::Taint(resource.clone()));
        }
      }
      if !team.taints.is_empty() || team.infrastructure_changed {
        commands.push(TerraformCommand::Apply);
      }
      (team_id, commands)
    })
    .collect()
}
