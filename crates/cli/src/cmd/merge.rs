//! Implementation of the `rangeforge merge` command.

use std::path::PathBuf;

use anyhow::{Context, Result};

use rangeforge_lib::load::{included_files, load_layers};

use crate::output::{Mark, OutputFormat, entry, mark, print_json, stat};

pub fn cmd_merge(layers: &[PathBuf], files_only: bool, output: OutputFormat) -> Result<()> {
  if files_only {
    let files = included_files(layers).context("Failed to read layer files")?;
    if output.is_json() {
      return print_json(&files);
    }
    for file in &files {
      println!("{}", file.display());
    }
    return Ok(());
  }

  let layer = load_layers(layers).context("Failed to load configuration layers")?;
  if output.is_json() {
    return print_json(&layer);
  }

  mark(Mark::Done, format!("Merged {} layer file(s)", layers.len()));
  let collections: [(&str, Vec<&String>); 8] = [
    ("Environments", layer.environments.keys().collect()),
    ("Networks", layer.networks.keys().collect()),
    ("Hosts", layer.hosts.keys().collect()),
    ("Identities", layer.identities.keys().collect()),
    ("Scripts", layer.scripts.keys().collect()),
    ("Commands", layer.commands.keys().collect()),
    ("Remote files", layer.remote_files.keys().collect()),
    ("DNS records", layer.dns_records.keys().collect()),
  ];
  for (label, ids) in collections {
    if ids.is_empty() {
      continue;
    }
    stat(label, ids.len());
    for id in ids {
      entry(Mark::Note, format!("  {id}"));
    }
  }
  Ok(())
}
