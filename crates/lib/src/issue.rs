//! Contextual build errors.
//!
//! A [`BuildError`] is a stack of [`BuildIssue`]s, most specific first. Each issue carries
//! a human-readable reason, optionally the underlying error, and a bag of diagnostic
//! variables (object IDs, file names) that explain where the problem was found.
//!
//! ```text
//! error: team 0 could not be expanded
//!   1. provisioning step references unknown provisioner [host=web step=3 ref=setup]
//!   2. host web could not be provisioned [network=corp]
//!   3. team 0 could not be expanded [build=/envs/prod/build]
//! ```

use std::collections::BTreeMap;
use std::error::Error as StdError;
use std::fmt;

type Cause = Box<dyn StdError + Send + Sync + 'static>;

/// A single explanation in a [`BuildError`] chain.
#[derive(Debug)]
pub struct BuildIssue {
  pub reason: String,
  pub cause: Option<Cause>,
  pub vars: BTreeMap<String, String>,
}

impl BuildIssue {
  pub fn new(reason: impl Into<String>) -> Self {
    Self {
      reason: reason.into(),
      cause: None,
      vars: BTreeMap::new(),
    }
  }
}

impl fmt::Display for BuildIssue {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.reason)?;
    if !self.vars.is_empty() {
      let vars: Vec<String> = self.vars.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
      write!(f, " [{}]", vars.join(" "))?;
    }
    if let Some(cause) = &self.cause {
      write!(f, ": {}", cause)?;
    }
    Ok(())
  }
}

/// A stack of issues explaining why a build step failed, most specific first.
#[derive(Debug)]
pub struct BuildError {
  issues: Vec<BuildIssue>,
}

impl BuildError {
  pub fn new(reason: impl Into<String>) -> Self {
    Self {
      issues: vec![BuildIssue::new(reason)],
    }
  }

  /// Start a chain from an underlying error.
  pub fn caused_by(reason: impl Into<String>, cause: impl Into<Cause>) -> Self {
    let mut issue = BuildIssue::new(reason);
    issue.cause = Some(cause.into());
    Self { issues: vec![issue] }
  }

  /// Attach a diagnostic variable to the most recently added issue.
  pub fn var(mut self, key: impl Into<String>, value: impl fmt::Display) -> Self {
    if let Some(issue) = self.issues.last_mut() {
      issue.vars.insert(key.into(), value.to_string());
    }
    self
  }

  /// Add a less specific explanation on top of the chain.
  pub fn wrap(mut self, reason: impl Into<String>) -> Self {
    self.issues.push(BuildIssue::new(reason));
    self
  }

  /// Combine several independent failures into one report.
  pub fn aggregate(reason: impl Into<String>, errors: Vec<BuildError>) -> Self {
    let mut issues: Vec<BuildIssue> = errors.into_iter().flat_map(|e| e.issues).collect();
    issues.push(BuildIssue::new(reason));
    Self { issues }
  }

  pub fn issues(&self) -> &[BuildIssue] {
    &self.issues
  }

  /// The outermost (least specific) reason.
  pub fn reason(&self) -> &str {
    self.issues.last().map(|i| i.reason.as_str()).unwrap_or_default()
  }
}

impl fmt::Display for BuildError {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "{}", self.reason())?;
    if self.issues.len() > 1 {
      for (idx, issue) in self.issues.iter().enumerate() {
        write!(f, "\n  {}. {}", idx + 1, issue)?;
      }
    } else if let Some(issue) = self.issues.first() {
      if !issue.vars.is_empty() || issue.cause.is_some() {
        write!(f, "\n  1. {}", issue)?;
      }
    }
    Ok(())
  }
}

impl StdError for BuildError {
  fn source(&self) -> Option<&(dyn StdError + 'static)> {
    self
      .issues
      .iter()
      .find_map(|issue| issue.cause.as_deref().map(|c| c as &(dyn StdError + 'static)))
  }
}

/// Wrap foreign errors into a [`BuildError`] chain.
pub trait IssueContext<T> {
  fn issue(self, reason: impl Into<String>) -> Result<T, BuildError>;
}

impl<T, E> IssueContext<T> for Result<T, E>
where
  E: StdError + Send + Sync + 'static,
{
  fn issue(self, reason: impl Into<String>) -> Result<T, BuildError> {
    self.map_err(|e| BuildError::caused_by(reason, e))
  }
}
