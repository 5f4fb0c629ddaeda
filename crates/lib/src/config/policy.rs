//! Conflict policies declared on configuration objects.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The `on_conflict` block as written in a layer file.
///
/// ```json
/// { "on_conflict": { "do": "overwrite", "append": true } }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OnConflict {
  #[serde(rename = "do", default)]
  pub strategy: String,
  #[serde(default)]
  pub append: bool,
}

impl OnConflict {
  pub fn new(strategy: impl Into<String>) -> Self {
    Self {
      strategy: strategy.into(),
      append: false,
    }
  }

  pub fn with_append(mut self) -> Self {
    self.append = true;
    self
  }
}

/// How an overlay object is reconciled with the object it shadows.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ConflictStrategy {
  /// Field-wise overlay, the layer's non-zero fields win.
  #[default]
  Default,
  /// The layer replaces the base outright; the base keeps its own policy.
  Overwrite,
  /// Reverse overlay: the base's non-zero fields win over the layer's.
  Inherit,
  /// The base is kept unchanged.
  Skip,
  /// Shadowing is an error.
  Panic,
}

impl ConflictStrategy {
  /// Parse a declared strategy name. Returns `None` for anything unknown, including "".
  pub fn parse(name: &str) -> Option<Self> {
    match name {
      "default" | "merge" => Some(Self::Default),
      "overwrite" => Some(Self::Overwrite),
      "inherit" => Some(Self::Inherit),
      "skip" => Some(Self::Skip),
      "panic" => Some(Self::Panic),
      _ => None,
    }
  }

  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Default => "default",
      Self::Overwrite => "overwrite",
      Self::Inherit => "inherit",
      Self::Skip => "skip",
      Self::Panic => "panic",
    }
  }
}

impl fmt::Display for ConflictStrategy {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(self.as_str())
  }
}

/// A parsed, validated conflict policy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ConflictPolicy {
  pub strategy: ConflictStrategy,
  /// Concatenate list-valued fields instead of replacing them.
  pub append: bool,
}
