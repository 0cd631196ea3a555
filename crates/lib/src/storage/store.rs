//! Content-addressable object storage.
//!
//! Objects are immutable byte blobs keyed by `ObjectId::from_bytes` of their
//! content. Writing the same bytes twice is a no-op.
//!
//! # Storage Layout
//!
//! ```text
//! <root>/objects/
//! └── a0/
//!     └── 44242bf7de91dbb631db9ab631db9a
//! ```

use std::collections::HashMap;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::Serialize;
use thiserror::Error;
use tracing::{debug, trace};
use walkdir::WalkDir;

use super::object_id::{OBJECT_ID_HEX_LEN, ObjectId};

/// Errors that can occur when reading or writing stored objects and index entries.
#[derive(Debug, Error)]
pub enum StoreError {
  /// Failed to read an object or index file.
  #[error("failed to read {path}: {source}")]
  Read {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  /// Failed to write an object or index file.
  #[error("failed to write {path}: {source}")]
  Write {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  /// Failed to create a store directory.
  #[error("failed to create store directory {path}: {source}")]
  CreateDir {
    path: PathBuf,
    #[source]
    source: io::Error,
  },

  /// Failed to parse the index file.
  #[error("failed to parse index {path}: {source}")]
  Parse {
    path: PathBuf,
    #[source]
    source: serde_json::Error,
  },

  /// Failed to serialize the index.
  #[error("failed to serialize index: {0}")]
  Serialize(#[source] serde_json::Error),
}

/// Object count and total size of a store.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StoreStats {
  pub objects: usize,
  pub bytes: u64,
}

/// A content-addressable blob store.
pub trait ContentStore: Send + Sync {
  /// Fetch an object, `None` if absent.
  fn get(&self, id: &ObjectId) -> Result<Option<Vec<u8>>, StoreError>;

  /// Store bytes and return their id.
  fn put(&self, data: &[u8]) -> Result<ObjectId, StoreError>;

  /// Whether an object is present.
  fn contains(&self, id: &ObjectId) -> Result<bool, StoreError>;

  fn stats(&self) -> Result<StoreStats, StoreError>;
}

/// A store held entirely in memory. Used by editors, tests and throwaway builds.
#[derive(Debug, Default)]
pub struct MemoryStore {
  objects: RwLock<HashMap<ObjectId, Vec<u8>>>,
}

impl MemoryStore {
  pub fn new() -> Self {
    Self::default()
  }
}

impl ContentStore for MemoryStore {
  fn get(&self, id: &ObjectId) -> Result<Option<Vec<u8>>, StoreError> {
    Ok(self.objects.read().get(id).cloned())
  }

  fn put(&self, data: &[u8]) -> Result<ObjectId, StoreError> {
    let id = ObjectId::from_bytes(data);
    self.objects.write().entry(id).or_insert_with(|| data.to_vec());
    Ok(id)
  }

  fn contains(&self, id: &ObjectId) -> Result<bool, StoreError> {
    Ok(self.objects.read().contains_key(id))
  }

  fn stats(&self) -> Result<StoreStats, StoreError> {
    let objects = self.objects.read();
    Ok(StoreStats {
      objects: objects.len(),
      bytes: objects.values().map(|v| v.len() as u64).sum(),
    })
  }
}

/// A store backed by one file per object under a fan-out directory tree.
///
/// Safe to share between processes: objects are written to a temporary file
/// and renamed into place, so readers never see partial content.
#[derive(Debug, Clone)]
pub struct FileStore {
  root: PathBuf,
}

impl FileStore {
  /// Open (creating if needed) a store rooted at `root`.
  pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
    let root = root.into();
    fs::create_dir_all(&root).map_err(|source| StoreError::CreateDir {
      path: root.clone(),
      source,
    })?;
    Ok(Self { root })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Path at which an object is (or would be) stored.
  pub fn object_path(&self, id: &ObjectId) -> PathBuf {
    let hex = id.to_string();
    self.root.join(&hex[..2]).join(&hex[2..])
  }

  /// Ids of every stored object, in no particular order.
  pub fn object_ids(&self) -> Vec<ObjectId> {
    WalkDir::new(&self.root)
      .min_depth(2)
      .max_depth(2)
      .into_iter()
      .filter_map(|entry| entry.ok())
      .filter(|entry| entry.file_type().is_file())
      .filter_map(|entry| object_id_for_path(entry.path()))
      .collect()
  }
}

/// Recover an id from `<root>/ab/cdef...`, ignoring stray files.
fn object_id_for_path(path: &Path) -> Option<ObjectId> {
  let file = path.file_name()?.to_str()?;
  let dir = path.parent()?.file_name()?.to_str()?;
  let hex = format!("{dir}{file}");
  if hex.len() != OBJECT_ID_HEX_LEN {
    return None;
  }
  ObjectId::try_parse(&hex)
}

impl ContentStore for FileStore {
  fn get(&self, id: &ObjectId) -> Result<Option<Vec<u8>>, StoreError> {
    let path = self.object_path(id);
    match fs::read(&path) {
      Ok(data) => Ok(Some(data)),
      Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
      Err(source) => Err(StoreError::Read { path, source }),
    }
  }

  fn put(&self, data: &[u8]) -> Result<ObjectId, StoreError> {
    let id = ObjectId::from_bytes(data);
    let path = self.object_path(&id);
    if path.exists() {
      trace!(object = %id, "object already stored");
      return Ok(id);
    }

    let dir = path.parent().unwrap_or(&self.root);
    fs::create_dir_all(dir).map_err(|source| StoreError::CreateDir {
      path: dir.to_path_buf(),
      source,
    })?;
    write_atomic(&path, data)?;

    debug!(object = %id, bytes = data.len(), "stored object");
    Ok(id)
  }

  fn contains(&self, id: &ObjectId) -> Result<bool, StoreError> {
    Ok(self.object_path(id).is_file())
  }

  fn stats(&self) -> Result<StoreStats, StoreError> {
    let mut stats = StoreStats::default();
    for id in self.object_ids() {
      let path = self.object_path(&id);
      let meta = fs::metadata(&path).map_err(|source| StoreError::Read { path, source })?;
      stats.objects += 1;
      stats.bytes += meta.len();
    }
    Ok(stats)
  }
}

/// Write a file via a sibling temporary file and a rename.
pub(crate) fn write_atomic(path: &Path, data: &[u8]) -> Result<(), StoreError> {
  let dir = path.parent().unwrap_or_else(|| Path::new("."));
  let write_err = |source: io::Error| StoreError::Write {
    path: path.to_path_buf(),
    source,
  };

  let mut temp = tempfile::NamedTempFile::new_in(dir).map_err(write_err)?;
  temp.write_all(data).map_err(write_err)?;
  temp.persist(path).map_err(|e| write_err(e.error))?;
  Ok(())
}
