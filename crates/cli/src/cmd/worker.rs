//! Implementation of the hidden `forge worker` command.
//!
//! `forge build --remote` starts one worker per command. The worker reads a
//! single request from stdin, runs it against the shared store and writes
//! the response to stdout.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::debug;

use assetforge_lib::remote::{CommandRegistry, WireFormat, serve_stdio};

pub fn cmd_worker(store: &Path, format: WireFormat) -> Result<()> {
  debug!(store = %store.display(), format = %format, "worker started");
  let registry = CommandRegistry::with_builtins();

  let rt = tokio::runtime::Runtime::new().context("Failed to create async runtime")?;
  rt.block_on(serve_stdio(&registry, store, format))
    .context("Worker failed")?;
  Ok(())
}
