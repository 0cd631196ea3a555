mod cmd;
mod logging;
mod output;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use assetforge_lib::platform::paths;
use assetforge_lib::remote::WireFormat;

use crate::cmd::{BuildArgs, CacheCommand};
use crate::output::OutputFormat;

/// forge - incremental asset builds
#[derive(Parser)]
#[command(name = "forge")]
#[command(author, version, about, long_about = None)]
struct Cli {
  /// Enable verbose output
  #[arg(short, long, global = true)]
  verbose: bool,

  /// Log engine internals at debug level
  #[arg(long, global = true)]
  debug: bool,

  /// Also write diagnostic logs to this file
  #[arg(long, global = true, value_name = "PATH")]
  log_file: Option<PathBuf>,

  /// Object store directory (default: $ASSETFORGE_STORE, then the user cache directory)
  #[arg(long, global = true, value_name = "DIR")]
  store: Option<PathBuf>,

  #[command(subcommand)]
  command: Commands,
}

#[derive(Subcommand)]
enum Commands {
  /// Build every step of a plan file
  Build {
    /// Path to the plan file
    #[arg(default_value = "plan.json")]
    plan: PathBuf,

    /// Commands to run at the same time (default: number of CPUs)
    #[arg(short, long, value_name = "N")]
    jobs: Option<usize>,

    /// Variable visible to every command, as KEY=VALUE
    #[arg(long = "var", value_name = "KEY=VALUE", value_parser = parse_variable)]
    variables: Vec<(String, String)>,

    /// Run commands in worker processes
    #[arg(long)]
    remote: bool,

    /// Encoding used to talk to worker processes
    #[arg(long, default_value = "binary", value_parser = parse_wire_format)]
    format: WireFormat,

    /// Output format
    #[arg(short, long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Print the content hash of files
  Hash {
    #[arg(required = true)]
    files: Vec<PathBuf>,
  },

  /// Inspect recorded command results
  Cache {
    #[command(subcommand)]
    command: CacheCommand,
  },

  /// Serve one remote-execution request over stdin/stdout
  #[command(hide = true)]
  Worker {
    #[arg(long, default_value = "binary", value_parser = parse_wire_format)]
    format: WireFormat,
  },
}

fn parse_variable(s: &str) -> Result<(String, String), String> {
  match s.split_once('=') {
    Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
    _ => Err(format!("expected KEY=VALUE, got '{s}'")),
  }
}

fn parse_wire_format(s: &str) -> Result<WireFormat, String> {
  s.parse().map_err(|e: assetforge_lib::remote::TransportError| e.to_string())
}

fn main() -> Result<()> {
  let cli = Cli::parse();

  logging::init(cli.verbose, cli.debug, cli.log_file.as_deref())?;

  let store_flag = cli.store;
  let store = move || -> Result<PathBuf> {
    match store_flag {
      Some(dir) => Ok(dir),
      None => paths::store_dir().context("Cannot determine the store directory; pass --store"),
    }
  };

  match cli.command {
    Commands::Build {
      plan,
      jobs,
      variables,
      remote,
      format,
      output,
    } => {
      let args = BuildArgs {
        plan,
        store: store()?,
        jobs,
        variables: variables.into_iter().collect(),
        remote,
        format,
        output,
        verbose: cli.verbose,
      };
      let success = cmd::cmd_build(&args)?;
      if !success {
        std::process::exit(1);
      }
    }
    Commands::Hash { files } => cmd::cmd_hash(&files)?,
    Commands::Cache { command } => cmd::cmd_cache(&store()?, command)?,
    Commands::Worker { format } => cmd::cmd_worker(&store()?, format)?,
  }

  Ok(())
}
