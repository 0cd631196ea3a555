//! Diagnostic logging for forge.
//!
//! Everything goes to stderr. `--log-file` adds a plain-text copy of the same
//! events, and `RUST_LOG` overrides the level picked from the flags.

use std::fs::File;
use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Level used when `RUST_LOG` is not set.
fn default_level(verbose: bool, debug: bool) -> &'static str {
  match (debug, verbose) {
    (true, _) => "debug",
    (false, true) => "info",
    (false, false) => "warn",
  }
}

pub fn init(verbose: bool, debug: bool, log_file: Option<&Path>) -> Result<()> {
  let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level(verbose, debug)));

  let file_layer = match log_file {
    Some(path) => {
      let file = File::create(path).with_context(|| format!("Failed to create log file {}", path.display()))?;
      Some(fmt::layer().with_writer(Mutex::new(file)).with_ansi(false))
    }
    None => None,
  };

  tracing_subscriber::registry()
    .with(filter)
    .with(fmt::layer().with_writer(std::io::stderr).without_time())
    .with(file_layer)
    .try_init()
    .context("Failed to install the log subscriber")
}
