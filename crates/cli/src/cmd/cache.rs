//! Implementation of the `forge cache` commands.
//!
//! Read-only views of the command results recorded in the object store.

use std::path::Path;

use anyhow::{Context, Result, bail};
use clap::Subcommand;
use owo_colors::{OwoColorize, Stream};
use serde::Serialize;

use assetforge_lib::build::{CommandResultEntry, ResultMap};
use assetforge_lib::storage::{ObjectDatabase, ObjectId};

use crate::output::{
  OutputFormat, format_bytes, print_info, print_json, print_object_row, print_stat, print_success, symbols,
};

#[derive(Subcommand)]
pub enum CacheCommand {
  /// List every recorded command result
  List {
    #[arg(short, long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Show the recorded result of one command hash
  Show {
    /// Command hash, as printed by `forge cache list`
    hash: String,

    #[arg(short, long, value_enum, default_value = "text")]
    output: OutputFormat,
  },

  /// Show object store usage
  Stats {
    #[arg(short, long, value_enum, default_value = "text")]
    output: OutputFormat,
  },
}

#[derive(Serialize)]
struct ResultSummary {
  hash: ObjectId,
  inputs: usize,
  outputs: usize,
  messages: usize,
}

pub fn cmd_cache(store: &Path, command: CacheCommand) -> Result<()> {
  let database =
    ObjectDatabase::open(store).with_context(|| format!("Failed to open store: {}", store.display()))?;
  let results = ResultMap::new(database.clone());

  match command {
    CacheCommand::List { output } => list(&results, output),
    CacheCommand::Show { hash, output } => show(&results, &hash, output),
    CacheCommand::Stats { output } => {
      let stats = database.store.stats().context("Failed to read store statistics")?;
      if output.is_json() {
        print_json(&stats)?;
      } else {
        print_stat("Store", store.display());
        print_stat("Objects", stats.objects);
        print_stat("Size", format_bytes(stats.bytes));
      }
      Ok(())
    }
  }
}

fn list(results: &ResultMap, output: OutputFormat) -> Result<()> {
  let mut summaries = Vec::new();
  for hash in results.result_hashes().context("Failed to read the store index")? {
    let Some(entry) = results.load_result(&hash)? else {
      continue;
    };
    summaries.push(ResultSummary {
      hash,
      inputs: entry.input_dependency_versions.len(),
      outputs: entry.output_objects.len(),
      messages: entry.log_messages.len(),
    });
  }

  if output.is_json() {
    return print_json(&summaries);
  }

  if summaries.is_empty() {
    print_info("No command results recorded.");
    return Ok(());
  }

  print_success(&format!("{} command result(s)", summaries.len()));
  for summary in &summaries {
    println!(
      "  {} {} {}",
      symbols::INFO,
      summary.hash,
      format!(
        "({} inputs, {} outputs, {} messages)",
        summary.inputs, summary.outputs, summary.messages
      )
      .if_supports_color(Stream::Stdout, |s| s.dimmed())
    );
  }
  Ok(())
}

fn show(results: &ResultMap, hash: &str, output: OutputFormat) -> Result<()> {
  let hash: ObjectId = hash.parse()?;
  let Some(entry) = results.load_result(&hash)? else {
    bail!("No result recorded for {hash}");
  };

  if output.is_json() {
    return print_json(&entry);
  }
  print_entry(&hash, &entry);
  Ok(())
}

fn print_entry(hash: &ObjectId, entry: &CommandResultEntry) {
  print_success(&format!("Result {hash}"));

  println!();
  println!("Inputs:");
  for (url, version) in &entry.input_dependency_versions {
    print_object_row(symbols::MINUS, url, version);
  }

  println!();
  println!("Outputs:");
  for (url, id) in &entry.output_objects {
    print_object_row(symbols::PLUS, url, id);
  }

  if !entry.tag_symbols.is_empty() {
    println!();
    println!("Tags:");
    for (url, symbol) in &entry.tag_symbols {
      println!("  {} {} {}", symbols::INFO, url, symbol);
    }
  }

  if !entry.log_messages.is_empty() {
    println!();
    println!("Log:");
    for message in &entry.log_messages {
      println!("  {message}");
    }
  }
}
