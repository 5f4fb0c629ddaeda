//! Terminal output shared by every command.
//!
//! Text lines carry a [`Mark`] that is colored only when the stream supports it.
//! `--output json` bypasses all of it and prints one pretty JSON document on stdout.

use std::fmt::Display;
use std::time::Duration;

use anyhow::Context;
use clap::ValueEnum;
use owo_colors::{OwoColorize, Stream, Style};

use rangeforge_lib::plan::TaskAction;
use rangeforge_lib::util::hash::Checksum;

#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
  #[default]
  Text,
  Json,
}

impl OutputFormat {
  pub fn is_json(self) -> bool {
    matches!(self, OutputFormat::Json)
  }
}

/// Leading symbol of an output line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mark {
  Done,
  Failed,
  Skipped,
  Note,
  Create,
  Recreate,
  Removed,
  Command,
}

impl Mark {
  fn glyph(self) -> &'static str {
    match self {
      Mark::Done => "✓",
      Mark::Failed => "✗",
      Mark::Skipped => "⚠",
      Mark::Note => "•",
      Mark::Create => "+",
      Mark::Recreate => "~",
      Mark::Removed => "-",
      Mark::Command => "→",
    }
  }

  fn style(self) -> Style {
    match self {
      Mark::Done | Mark::Create => Style::new().green(),
      Mark::Failed | Mark::Removed => Style::new().red(),
      Mark::Skipped | Mark::Recreate => Style::new().yellow(),
      Mark::Note => Style::new().blue(),
      Mark::Command => Style::new().cyan(),
    }
  }

  /// Failures and skipped jobs go to stderr.
  fn stream(self) -> Stream {
    match self {
      Mark::Failed | Mark::Skipped => Stream::Stderr,
      _ => Stream::Stdout,
    }
  }
}

impl From<TaskAction> for Mark {
  fn from(action: TaskAction) -> Self {
    match action {
      TaskAction::Create => Mark::Create,
      TaskAction::Recreate => Mark::Recreate,
    }
  }
}

fn emit(mark: Mark, indent: &str, message: impl Display) {
  let style = mark.style();
  let stream = mark.stream();
  let glyph = mark.glyph();
  let glyph = glyph.if_supports_color(stream, |g| g.style(style));
  match stream {
    Stream::Stderr => eprintln!("{indent}{glyph} {message}"),
    _ => println!("{indent}{glyph} {message}"),
  }
}

/// A top-level status line.
pub fn mark(mark: Mark, message: impl Display) {
  emit(mark, "", message);
}

/// An indented line below a heading, e.g. one planned task.
pub fn entry(mark: Mark, message: impl Display) {
  emit(mark, "  ", message);
}

pub fn stat(label: &str, value: impl Display) {
  println!(
    "  {}: {}",
    label.if_supports_color(Stream::Stdout, |s| s.dimmed()),
    value
  );
}

/// First twelve hex digits of a checksum.
pub fn short_checksum(checksum: Checksum) -> String {
  format!("{:012x}", checksum.0 >> 16)
}

pub fn human_size(bytes: u64) -> String {
  const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
  let mut size = bytes as f64;
  let mut unit = 0;
  while size >= 1024.0 && unit < UNITS.len() - 1 {
    size /= 1024.0;
    unit += 1;
  }
  if unit == 0 {
    format!("{bytes} B")
  } else {
    format!("{size:.1} {}", UNITS[unit])
  }
}

/// Job runtime rounded to milliseconds.
pub fn elapsed(duration: Duration) -> String {
  let millis = Duration::from_millis(duration.as_millis() as u64);
  humantime::format_duration(millis).to_string()
}

pub fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
  let json = serde_json::to_string_pretty(value).context("Failed to serialize to JSON")?;
  println!("{json}");
  Ok(())
}
