//! Reconstruction of commands from their type name and encoded parameters.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use crate::build::Command;

use super::wire::{TransportError, WireFormat};

/// A command that can be shipped to a remote worker.
///
/// `TYPE_NAME` must equal what `Command::type_name` returns.
pub trait RemoteCommand: Command + DeserializeOwned + 'static {
  const TYPE_NAME: &'static str;
}

type DecodeFn = fn(&[u8], WireFormat) -> Result<Arc<dyn Command>, TransportError>;

fn decode<T: RemoteCommand>(bytes: &[u8], format: WireFormat) -> Result<Arc<dyn Command>, TransportError> {
  let command: T = format.deserialize(bytes)?;
  Ok(Arc::new(command))
}

/// Maps command type names to decoders.
#[derive(Clone, Default)]
pub struct CommandRegistry {
  decoders: HashMap<&'static str, DecodeFn>,
}

impl CommandRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  /// A registry knowing every command shipped with this crate.
  pub fn with_builtins() -> Self {
    let mut registry = Self::new();
    crate::builtin::register_builtins(&mut registry);
    registry
  }

  pub fn register<T: RemoteCommand>(&mut self) -> &mut Self {
    self.decoders.insert(T::TYPE_NAME, decode::<T> as DecodeFn);
    self
  }

  pub fn contains(&self, type_name: &str) -> bool {
    self.decoders.contains_key(type_name)
  }

  pub fn type_names(&self) -> Vec<&'static str> {
    let mut names: Vec<_> = self.decoders.keys().copied().collect();
    names.sort_unstable();
    names
  }

  /// Rebuild a command from its type name and parameters.
  pub fn deserialize(&self, type_name: &str, bytes: &[u8], format: WireFormat) -> Result<Arc<dyn Command>, TransportError> {
    let decode = self
      .decoders
      .get(type_name)
      .ok_or_else(|| TransportError::UnknownCommandType(type_name.to_string()))?;
    decode(bytes, format)
  }
}

impl fmt::Debug for CommandRegistry {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CommandRegistry")
      .field("types", &self.type_names())
      .finish()
  }
}
