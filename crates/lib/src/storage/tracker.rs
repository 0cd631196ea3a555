//! Input version tracking.
//!
//! A tracker answers "what is the current content hash of this source file".
//! The build engine treats it as the only authority on whether an input changed.

use std::collections::HashMap;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use parking_lot::{Mutex, RwLock};
use thiserror::Error;
use tracing::trace;

use super::object_id::{ObjectId, ObjectIdBuilder};

#[derive(Debug, Error)]
pub enum TrackerError {
  /// The input does not exist.
  #[error("input not found: {0}")]
  NotFound(PathBuf),

  /// The input exists but could not be read.
  #[error("failed to read input {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },
}

/// Source of truth for the current version of input files.
pub trait InputVersionTracker: Send + Sync {
  fn hash(&self, path: &Path) -> Result<ObjectId, TrackerError>;
}

#[derive(Debug, Clone, Copy)]
struct CachedVersion {
  modified: SystemTime,
  len: u64,
  id: ObjectId,
}

/// Hashes file contents, caching each result until the file's
/// modification time or size changes.
///
/// Call [`refresh`](Self::refresh) between builds when files may be
/// rewritten within the file system's timestamp granularity.
#[derive(Debug, Default)]
pub struct FileVersionTracker {
  cache: Mutex<HashMap<PathBuf, CachedVersion>>,
}

impl FileVersionTracker {
  pub fn new() -> Self {
    Self::default()
  }

  /// Forget every cached hash.
  pub fn refresh(&self) {
    self.cache.lock().clear();
  }
}

impl InputVersionTracker for FileVersionTracker {
  fn hash(&self, path: &Path) -> Result<ObjectId, TrackerError> {
    let read_err = |source: io::Error| {
      if source.kind() == io::ErrorKind::NotFound {
        TrackerError::NotFound(path.to_path_buf())
      } else {
        TrackerError::Read {
          path: path.to_path_buf(),
          source,
        }
      }
    };

    let meta = fs::metadata(path).map_err(read_err)?;
    let modified = meta.modified().map_err(read_err)?;
    let len = meta.len();

    if let Some(cached) = self.cache.lock().get(path)
      && cached.modified == modified
      && cached.len == len
    {
      trace!(path = %path.display(), "input hash served from cache");
      return Ok(cached.id);
    }

    let mut builder = ObjectIdBuilder::new();
    let mut file = File::open(path).map_err(read_err)?;
    io::copy(&mut file, &mut builder).map_err(read_err)?;
    let id = builder.compute_hash();

    self
      .cache
      .lock()
      .insert(path.to_path_buf(), CachedVersion { modified, len, id });
    Ok(id)
  }
}

/// A tracker whose versions are set by the caller.
///
/// Used where inputs live in memory (editor sessions) and in tests.
#[derive(Debug, Default)]
pub struct MemoryVersionTracker {
  versions: RwLock<HashMap<PathBuf, ObjectId>>,
}

impl MemoryVersionTracker {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn set(&self, path: impl Into<PathBuf>, id: ObjectId) {
    self.versions.write().insert(path.into(), id);
  }

  /// Record the hash of `content` as the version of `path`.
  pub fn set_content(&self, path: impl Into<PathBuf>, content: &[u8]) {
    self.set(path, ObjectId::from_bytes(content));
  }

  pub fn remove(&self, path: &Path) {
    self.versions.write().remove(path);
  }
}

impl InputVersionTracker for MemoryVersionTracker {
  fn hash(&self, path: &Path) -> Result<ObjectId, TrackerError> {
    self
      .versions
      .read()
      .get(path)
      .copied()
      .ok_or_else(|| TrackerError::NotFound(path.to_path_buf()))
  }
}
