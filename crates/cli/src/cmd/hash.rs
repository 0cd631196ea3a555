//! Implementation of the `forge hash` command.

use std::path::PathBuf;

use anyhow::{Context, Result};

use assetforge_lib::storage::{FileVersionTracker, InputVersionTracker};

/// Print the content hash the engine records for each file.
pub fn cmd_hash(files: &[PathBuf]) -> Result<()> {
  let tracker = FileVersionTracker::new();
  for file in files {
    let id = tracker
      .hash(file)
      .with_context(|| format!("Failed to hash {}", file.display()))?;
    println!("{}  {}", id, file.display());
  }
  Ok(())
}
