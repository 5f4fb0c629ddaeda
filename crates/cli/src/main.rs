mod cmd;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::output::OutputFormat;

/// rangeforge - layered configuration to provisioned competition ranges
#[derive(Parser)]
#[command(name = "rangeforge")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Increase log verbosity (-v debug, -vv trace)
  #[arg(short, long, global = true, action = clap::ArgAction::Count)]
  verbose: u8,

  /// Directory holding per-build state (default: $RANGEFORGE_DATA_DIR or the platform data dir)
  #[arg(long, global = true)]
  data_dir: Option<PathBuf>,

  /// Output format
  #[arg(short, long, global = true, value_enum, default_value_t = OutputFormat::Text)]
  output: OutputFormat,

  #[command(subcommand)]
  command: Commands,
}

/// Layer files and the environment to expand from them.
#[derive(Args, Debug, Clone)]
pub struct Target {
  /// Layer files, folded left to right
  #[arg(required = true)]
  pub layers: Vec<PathBuf>,

  /// Environment ID to expand
  #[arg(short, long)]
  pub env: String,
}

#[derive(Subcommand)]
enum Commands {
  /// Fold layer files and print the resolved configuration
  Merge {
    /// Layer files, folded left to right
    #[arg(required = true)]
    layers: Vec<PathBuf>,

    /// Only list the files the layers pull in
    #[arg(long)]
    files: bool,
  },

  /// Build the dependency snapshot of an environment
  Snapshot {
    #[command(flatten)]
    target: Target,

    /// Persist the snapshot as the build's stored state
    #[arg(long)]
    save: bool,
  },

  /// Show what changed since the stored snapshot
  Plan {
    #[command(flatten)]
    target: Target,
  },

  /// Print the dependency graph in DOT format
  Graph {
    #[command(flatten)]
    target: Target,
  },

  /// Show the terraform commands each team needs
  TfNeeds {
    #[command(flatten)]
    target: Target,
  },

  /// Execute the plan and store the snapshot on success
  Run {
    #[command(flatten)]
    target: Target,

    #[command(flatten)]
    options: cmd::RunOptions,
  },

  /// Show the stored snapshot of a build
  Status {
    /// Environment ID
    #[arg(short, long)]
    env: String,
  },
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  let default_level = match cli.verbose {
    0 => "warn",
    1 => "debug",
    _ => "trace",
  };
  tracing_subscriber::fmt()
    .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
    .with_writer(std::io::stderr)
    .without_time()
    .init();

  let data_dir = cli.data_dir.unwrap_or_else(rangeforge_lib::platform::paths::data_dir);

  match cli.command {
    Commands::Merge { layers, files } => cmd::cmd_merge(&layers, files, cli.output),
    Commands::Snapshot { target, save } => cmd::cmd_snapshot(&target, &data_dir, save, cli.output),
    Commands::Plan { target } => cmd::cmd_plan(&target, &data_dir, cli.output),
    Commands::Graph { target } => cmd::cmd_graph(&target),
    Commands::TfNeeds { target } => cmd::cmd_tf_needs(&target, &data_dir, cli.output),
    Commands::Run { target, options } => cmd::cmd_run(&target, &data_dir, &options, cli.output),
    Commands::Status { env } => cmd::cmd_status(&env, &data_dir, cli.output),
  }
}
