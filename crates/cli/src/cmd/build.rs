//! Implementation of the `forge build` command.
//!
//! Loads a JSON plan, runs it against the object store and prints a summary.
//! Ctrl-C cancels the run; steps still pending finish as cancelled.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use assetforge_lib::build::{BuildReport, Builder, BuilderConfig, CancellationToken, ResultStatus};
use assetforge_lib::builtin::load_plan;
use assetforge_lib::diagnostics::LogMessageType;
use assetforge_lib::remote::{CommandRegistry, ProcessRemoteConfig, ProcessRemoteExecutor, WireFormat};
use assetforge_lib::storage::{FileVersionTracker, ObjectDatabase};

use crate::output::{
  OutputFormat, format_duration, print_error, print_json, print_log_message, print_object_row, print_stat, print_success,
  symbols,
};

pub struct BuildArgs {
  pub plan: PathBuf,
  pub store: PathBuf,
  pub jobs: Option<usize>,
  pub variables: BTreeMap<String, String>,
  pub remote: bool,
  pub format: WireFormat,
  pub output: OutputFormat,
  pub verbose: bool,
}

/// Run the build. Returns whether the root step succeeded.
pub fn cmd_build(args: &BuildArgs) -> Result<bool> {
  let root = load_plan(&args.plan).with_context(|| format!("Failed to load plan: {}", args.plan.display()))?;
  let database = ObjectDatabase::open(&args.store)
    .with_context(|| format!("Failed to open store: {}", args.store.display()))?;

  let mut config = BuilderConfig {
    variables: args.variables.clone(),
    ..BuilderConfig::default()
  };
  if let Some(jobs) = args.jobs {
    config.parallelism = jobs.max(1);
  }
  if args.verbose {
    config.min_log_level = LogMessageType::Verbose;
  }

  let mut builder = Builder::new(config, database, Arc::new(FileVersionTracker::new()));
  if args.remote {
    builder = builder.with_remote(Arc::new(worker_executor(args)?));
  }

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  let report = rt.block_on(async {
    let cancellation = CancellationToken::new();
    let on_interrupt = cancellation.clone();
    tokio::spawn(async move {
      if tokio::signal::ctrl_c().await.is_ok() {
        warn!("interrupted, cancelling build");
        on_interrupt.cancel();
      }
    });
    builder.run_with_cancellation(root, cancellation).await
  });
  info!(status = %report.status, elapsed = ?report.elapsed, "build complete");

  if args.output.is_json() {
    print_json(&report)?;
  } else {
    print_report(&report, args.verbose);
  }

  Ok(report.status.is_successful())
}

/// Workers are this binary's hidden `worker` subcommand against the same store.
fn worker_executor(args: &BuildArgs) -> Result<ProcessRemoteExecutor> {
  let program = std::env::current_exe().context("Failed to locate the forge executable")?;
  let config = ProcessRemoteConfig::new(program)
    .with_args([
      "--store".to_string(),
      args.store.to_string_lossy().into_owned(),
      "worker".to_string(),
      "--format".to_string(),
      args.format.name().to_string(),
    ])
    .with_format(args.format);
  Ok(ProcessRemoteExecutor::new(config, CommandRegistry::with_builtins()))
}

fn print_report(report: &BuildReport, verbose: bool) {
  for message in &report.log {
    print_log_message(message);
  }

  println!();
  match report.status {
    ResultStatus::Successful => print_success("Build complete!"),
    ResultStatus::NotTriggeredWasSuccessful => print_success("Everything up to date"),
    status => print_error(&format!("Build {status}")),
  }

  let counts = &report.counts;
  print_stat("Built", counts.successful);
  print_stat("Up to date", counts.up_to_date);
  for (label, count) in [
    ("Failed", counts.failed),
    ("Skipped", counts.prerequisite_failed),
    ("Cancelled", counts.cancelled),
  ] {
    if count > 0 {
      print_stat(label, count);
    }
  }
  print_stat("Outputs", report.outputs.len());
  print_stat("Duration", format_duration(report.elapsed));

  if verbose && !report.outputs.is_empty() {
    println!();
    println!("Outputs:");
    for (url, id) in &report.outputs {
      print_object_row(symbols::ARROW, url, id);
    }
  }
}
