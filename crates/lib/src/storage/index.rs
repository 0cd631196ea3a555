//! Named references into the content store.
//!
//! The index maps logical locations (`content://` url paths, result keys) to
//! object ids. It is the only mutable part of an object database.
//!
//! # Example Index File
//!
//! ```json
//! {
//!   "__results/2f1583c3ecee2c675d7bf66ce5e91d2c": "a044242bf7de91dbb631db9ab631db9a",
//!   "textures/grass": "c383152f672ceeec6cf67b5d2c1de9e5"
//! }
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::object_id::ObjectId;
use super::store::{StoreError, write_atomic};

/// A thread-safe map from names to object ids.
pub trait IndexMap: Send + Sync {
  fn get(&self, key: &str) -> Result<Option<ObjectId>, StoreError>;

  fn set(&self, key: &str, id: ObjectId) -> Result<(), StoreError>;

  /// All entries, sorted by key.
  fn entries(&self) -> Result<Vec<(String, ObjectId)>, StoreError>;
}

#[derive(Debug, Default)]
pub struct MemoryIndex {
  entries: RwLock<BTreeMap<String, ObjectId>>,
}

impl MemoryIndex {
  pub fn new() -> Self {
    Self::default()
  }
}

impl IndexMap for MemoryIndex {
  fn get(&self, key: &str) -> Result<Option<ObjectId>, StoreError> {
    Ok(self.entries.read().get(key).copied())
  }

  fn set(&self, key: &str, id: ObjectId) -> Result<(), StoreError> {
    self.entries.write().insert(key.to_string(), id);
    Ok(())
  }

  fn entries(&self) -> Result<Vec<(String, ObjectId)>, StoreError> {
    Ok(self.entries.read().iter().map(|(k, v)| (k.clone(), *v)).collect())
  }
}

/// An index persisted as a single JSON document.
///
/// The document is loaded once on open and rewritten atomically on every
/// `set`. Readers in other processes see either the old or the new document.
#[derive(Debug)]
pub struct FileIndex {
  path: PathBuf,
  entries: RwLock<BTreeMap<String, ObjectId>>,
  write_lock: Mutex<()>,
}

impl FileIndex {
  /// Load the index at `path`. A missing file is an empty index.
  pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
    let path = path.into();
    let entries = load_entries(&path)?;
    debug!(path = %path.display(), entries = entries.len(), "opened index");
    Ok(Self {
      path,
      entries: RwLock::new(entries),
      write_lock: Mutex::new(()),
    })
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Re-read the document, picking up writes from other processes.
  pub fn reload(&self) -> Result<(), StoreError> {
    let entries = load_entries(&self.path)?;
    *self.entries.write() = entries;
    Ok(())
  }
}

fn load_entries(path: &Path) -> Result<BTreeMap<String, ObjectId>, StoreError> {
  let content = match fs::read_to_string(path) {
    Ok(content) => content,
    Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
    Err(source) => {
      return Err(StoreError::Read {
        path: path.to_path_buf(),
        source,
      });
    }
  };
  serde_json::from_str(&content).map_err(|source| StoreError::Parse {
    path: path.to_path_buf(),
    source,
  })
}

impl IndexMap for FileIndex {
  fn get(&self, key: &str) -> Result<Option<ObjectId>, StoreError> {
    Ok(self.entries.read().get(key).copied())
  }

  fn set(&self, key: &str, id: ObjectId) -> Result<(), StoreError> {
    // Serializes writers so the document on disk never lags an earlier set.
    let _guard = self.write_lock.lock();
    let content = {
      let mut entries = self.entries.write();
      if entries.get(key) == Some(&id) {
        return Ok(());
      }
      entries.insert(key.to_string(), id);
      serde_json::to_string_pretty(&*entries).map_err(StoreError::Serialize)?
    };

    if let Some(dir) = self.path.parent() {
      fs::create_dir_all(dir).map_err(|source| StoreError::CreateDir {
        path: dir.to_path_buf(),
        source,
      })?;
    }
    write_atomic(&self.path, content.as_bytes())
  }

  fn entries(&self) -> Result<Vec<(String, ObjectId)>, StoreError> {
    Ok(self.entries.read().iter().map(|(k, v)| (k.clone(), *v)).collect())
  }
}
