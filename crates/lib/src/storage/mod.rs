//! Content hashing and the storage collaborators the build engine reads and writes.
//!
//! - `ObjectId` / `ObjectIdBuilder`: 128-bit content hashes
//! - `ObjectUrl`: typed input/output references
//! - `ContentStore` + `IndexMap`, bundled as `ObjectDatabase`
//! - `InputVersionTracker`: current versions of source files

pub mod index;
pub mod object_id;
pub mod store;
pub mod tracker;
pub mod url;

use std::path::Path;
use std::sync::Arc;

pub use index::{FileIndex, IndexMap, MemoryIndex};
pub use object_id::{ObjectId, ObjectIdBuilder, ParseObjectIdError};
pub use store::{ContentStore, FileStore, MemoryStore, StoreError, StoreStats};
pub use tracker::{FileVersionTracker, InputVersionTracker, MemoryVersionTracker, TrackerError};
pub use url::{ObjectUrl, ParseUrlError, UrlType};

/// Directory under the database root holding object files.
pub const OBJECTS_DIR: &str = "objects";

/// Index file name under the database root.
pub const INDEX_FILE: &str = "index.json";

/// A content store plus the index naming objects in it.
#[derive(Clone)]
pub struct ObjectDatabase {
  pub store: Arc<dyn ContentStore>,
  pub index: Arc<dyn IndexMap>,
}

impl ObjectDatabase {
  pub fn new(store: Arc<dyn ContentStore>, index: Arc<dyn IndexMap>) -> Self {
    Self { store, index }
  }

  /// A database that lives and dies with the process.
  pub fn in_memory() -> Self {
    Self::new(Arc::new(MemoryStore::new()), Arc::new(MemoryIndex::new()))
  }

  /// Open (creating if needed) an on-disk database.
  ///
  /// ```text
  /// <root>/
  /// ├── objects/
  /// └── index.json
  /// ```
  pub fn open(root: &Path) -> Result<Self, StoreError> {
    let store = FileStore::open(root.join(OBJECTS_DIR))?;
    let index = FileIndex::open(root.join(INDEX_FILE))?;
    Ok(Self::new(Arc::new(store), Arc::new(index)))
  }
}

impl std::fmt::Debug for ObjectDatabase {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("ObjectDatabase").finish_non_exhaustive()
  }
}
