//! Cached command results.
//!
//! A `CommandResultEntry` records what a command saw and produced. It is
//! stored in the object database and named in the index by the command hash:
//!
//! ```text
//! index:  __results/<command hash>  ->  <entry object id>
//! object: <u32 format version><bincode entry>
//! ```

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

use crate::consts::{RESULT_FORMAT_VERSION, RESULT_KEY_PREFIX};
use crate::diagnostics::SerializableLogMessage;
use crate::storage::{ObjectDatabase, ObjectId, ObjectUrl, StoreError, UrlType};

#[derive(Debug, Error)]
pub enum ResultMapError {
  #[error(transparent)]
  Store(#[from] StoreError),

  /// A result entry could not be encoded or decoded.
  #[error("failed to encode result entry: {0}")]
  Encoding(#[from] bincode::Error),

  /// An output tried to take a name the result map keeps for itself.
  #[error("output location {0} is reserved for cached results")]
  ReservedLocation(ObjectUrl),
}

/// The record of one command execution.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CommandResultEntry {
  /// Version of every input the command read, as observed when it ran.
  pub input_dependency_versions: BTreeMap<ObjectUrl, ObjectId>,
  /// Every object the command wrote.
  pub output_objects: BTreeMap<ObjectUrl, ObjectId>,
  /// Messages logged while the command ran.
  pub log_messages: Vec<SerializableLogMessage>,
  /// Free-form symbols attached to outputs.
  pub tag_symbols: Vec<(ObjectUrl, String)>,
}

impl CommandResultEntry {
  pub fn new() -> Self {
    Self::default()
  }

  /// Versioned binary encoding used for persistence.
  pub fn encode(&self) -> Result<Vec<u8>, bincode::Error> {
    let mut bytes = RESULT_FORMAT_VERSION.to_le_bytes().to_vec();
    bincode::serialize_into(&mut bytes, self)?;
    Ok(bytes)
  }

  /// Decode a persisted entry. Entries written by another format version
  /// decode to `None`.
  pub fn decode(bytes: &[u8]) -> Result<Option<Self>, bincode::Error> {
    let Some((version, body)) = bytes.split_first_chunk::<4>() else {
      return Ok(None);
    };
    if u32::from_le_bytes(*version) != RESULT_FORMAT_VERSION {
      return Ok(None);
    }
    bincode::deserialize(body).map(Some)
  }
}

/// Result and output bookkeeping over an object database.
#[derive(Debug, Clone)]
pub struct ResultMap {
  database: ObjectDatabase,
}

impl ResultMap {
  pub fn new(database: ObjectDatabase) -> Self {
    Self { database }
  }

  pub fn database(&self) -> &ObjectDatabase {
    &self.database
  }

  fn result_key(hash: &ObjectId) -> String {
    format!("{RESULT_KEY_PREFIX}{hash}")
  }

  /// Load the entry recorded for a command hash, if any.
  pub fn load_result(&self, hash: &ObjectId) -> Result<Option<CommandResultEntry>, ResultMapError> {
    let Some(entry_id) = self.database.index.get(&Self::result_key(hash))? else {
      return Ok(None);
    };
    let Some(bytes) = self.database.store.get(&entry_id)? else {
      debug!(command = %hash, entry = %entry_id, "result entry object missing");
      return Ok(None);
    };
    Ok(CommandResultEntry::decode(&bytes)?)
  }

  /// Record the entry for a command hash.
  pub fn store_result(&self, hash: &ObjectId, entry: &CommandResultEntry) -> Result<ObjectId, ResultMapError> {
    let bytes = entry.encode()?;
    let entry_id = self.database.store.put(&bytes)?;
    self.database.index.set(&Self::result_key(hash), entry_id)?;
    debug!(command = %hash, entry = %entry_id, "stored command result");
    Ok(entry_id)
  }

  /// Command hashes that have a recorded result.
  pub fn result_hashes(&self) -> Result<Vec<ObjectId>, StoreError> {
    Ok(
      self
        .database
        .index
        .entries()?
        .into_iter()
        .filter_map(|(key, _)| key.strip_prefix(RESULT_KEY_PREFIX).and_then(ObjectId::try_parse))
        .collect(),
    )
  }

  /// Whether `url` names an index key the result map owns.
  pub fn is_reserved_location(url: &ObjectUrl) -> bool {
    url.kind == UrlType::Content && url.path.trim_start_matches('/').starts_with(RESULT_KEY_PREFIX)
  }

  /// Name `content://` outputs in the index so later commands can read them.
  ///
  /// Nothing is published if any output sits under the result key prefix.
  pub fn publish_outputs(&self, outputs: &BTreeMap<ObjectUrl, ObjectId>) -> Result<(), ResultMapError> {
    if let Some(url) = outputs.keys().find(|url| Self::is_reserved_location(url)) {
      return Err(ResultMapError::ReservedLocation(url.clone()));
    }
    for (url, id) in outputs {
      if url.kind == UrlType::Content {
        self.database.index.set(&url.path, *id)?;
      }
    }
    Ok(())
  }

  /// Current object behind a `content://` url. File urls never resolve here.
  pub fn resolve(&self, url: &ObjectUrl) -> Result<Option<ObjectId>, StoreError> {
    match url.kind {
      UrlType::Content => self.database.index.get(&url.path),
      UrlType::File => Ok(None),
    }
  }

  pub fn contains(&self, id: &ObjectId) -> Result<bool, StoreError> {
    self.database.store.contains(id)
  }

  pub fn read(&self, id: &ObjectId) -> Result<Option<Vec<u8>>, StoreError> {
    self.database.store.get(id)
  }

  pub fn write(&self, data: &[u8]) -> Result<ObjectId, StoreError> {
    self.database.store.put(data)
  }
}
