//! Provenance tracking for configuration objects.
//!
//! Every object remembers which layer file declared it and, when that file was pulled in
//! through an `include`, which file included it. The stack is ordered most recent first:
//! merging an overlay pushes the overlay's sources on top of the base's.
//!
//! Relative file references (script sources, remote file sources) resolve against the
//! directories of the files in the stack, newest first.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// One location a configuration object was declared at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
  /// The layer file containing the declaration.
  pub file: PathBuf,
  /// The file whose `include` directive pulled `file` in, if any.
  pub included_by: Option<PathBuf>,
}

impl Source {
  pub fn new(file: impl Into<PathBuf>) -> Self {
    Self {
      file: file.into(),
      included_by: None,
    }
  }

  pub fn included_by(mut self, parent: impl Into<PathBuf>) -> Self {
    self.included_by = Some(parent.into());
    self
  }

  /// Directory relative references in this file are resolved against.
  pub fn dir(&self) -> &Path {
    self.file.parent().unwrap_or_else(|| Path::new("."))
  }
}

impl fmt::Display for Source {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match &self.included_by {
      Some(parent) => write!(f, "{} (included by {})", self.file.display(), parent.display()),
      None => write!(f, "{}", self.file.display()),
    }
  }
}

/// Ordered stack of declaration sites, most recent first.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
  stack: Vec<Source>,
}

impl Provenance {
  pub fn new(source: Source) -> Self {
    Self { stack: vec![source] }
  }

  /// Stack for an overlay result: the layer's sources on top of the base's.
  pub fn layered(layer: &Provenance, base: &Provenance) -> Self {
    let mut stack = layer.stack.clone();
    stack.extend(base.stack.iter().cloned());
    Self { stack }
  }

  pub fn is_empty(&self) -> bool {
    self.stack.is_empty()
  }

  pub fn sources(&self) -> &[Source] {
    &self.stack
  }

  /// The most recent declaration site.
  pub fn current(&self) -> Option<&Source> {
    self.stack.first()
  }

  /// Human-readable name of the most recent declaring file, for error messages.
  pub fn current_file(&self) -> String {
    self
      .current()
      .map(|s| s.file.display().to_string())
      .unwrap_or_else(|| "<unknown>".to_string())
  }

  /// Locate a referenced file.
  ///
  /// Absolute paths are checked as-is. Relative paths are tried against every declaring
  /// file's directory, newest first. Returns the canonical path of the first hit.
  pub fn locate(&self, reference: &str) -> Option<PathBuf> {
    let candidate = Path::new(reference);
    if candidate.is_absolute() {
      return candidate.exists().then(|| canonical(candidate));
    }

    self
      .stack
      .iter()
      .map(|source| source.dir().join(candidate))
      .find(|path| path.exists())
      .map(|path| canonical(&path))
  }
}

fn canonical(path: &Path) -> PathBuf {
  dunce::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}
