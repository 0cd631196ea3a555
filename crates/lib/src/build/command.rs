//! The command abstraction and the context a command executes in.
//!
//! Commands are opaque, already-configured units of work supplied by asset
//! compilers. The engine only needs their type name, their serialized
//! parameters and their declared inputs to key the cache, and an `execute`
//! entry point to run them.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::consts::COMMAND_HASH_VERSION;
use crate::diagnostics::Logger;
use crate::remote::{TransportError, WireFormat};
use crate::storage::{ObjectId, ObjectIdBuilder, ObjectUrl, StoreError, UrlType};

use super::context::{CancellationToken, ExecuteContext, InputError, OutputObjects, PrepareContext};
use super::result::CommandResultEntry;
use super::status::ResultStatus;
use super::step::BuildStep;

/// Errors a command or the engine can raise while executing a command.
#[derive(Debug, Error)]
pub enum CommandError {
  /// The command ran and reported failure.
  #[error("{0}")]
  Failed(String),

  /// The command's parameters are unusable. Reported without executing.
  #[error("invalid parameters: {0}")]
  InvalidParameters(String),

  /// A required input does not exist.
  #[error("missing input: {0}")]
  MissingInput(ObjectUrl),

  /// The context cannot provide a service the command asked for.
  #[error("unsupported operation: {0}")]
  Unsupported(String),

  /// The command observed the build's cancellation signal.
  #[error("cancelled")]
  Cancelled,

  #[error("io error: {0}")]
  Io(#[from] std::io::Error),

  #[error(transparent)]
  Input(#[from] InputError),

  #[error(transparent)]
  Store(#[from] StoreError),

  #[error(transparent)]
  Transport(#[from] TransportError),
}

/// A unit of work the build engine can schedule, cache and deduplicate.
#[async_trait]
pub trait Command: Send + Sync + fmt::Debug {
  /// Stable name of the command type. Part of the cache key and the
  /// identifier used to reconstruct the command in a remote worker.
  fn type_name(&self) -> &'static str;

  /// Human-readable description, used in logs.
  fn title(&self) -> String {
    self.type_name().to_string()
  }

  /// Inputs known before execution. Their versions are part of the cache key.
  fn input_files(&self) -> Vec<ObjectUrl> {
    Vec::new()
  }

  /// Serialize the command's parameters.
  fn encode(&self, format: WireFormat) -> Result<Vec<u8>, TransportError>;

  /// Check the parameters before anything else happens.
  fn validate(&self) -> Result<(), CommandError> {
    Ok(())
  }

  /// Run the command.
  ///
  /// Return `Ok(ResultStatus::Successful)` or `Ok(ResultStatus::Failed)`;
  /// returning `Err` is equivalent to failing with a logged error.
  async fn execute(&self, ctx: &mut CommandContext<'_>) -> Result<ResultStatus, CommandError>;
}

/// A command's identity hash and the input versions that went into it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandHash {
  pub hash: ObjectId,
  pub input_versions: BTreeMap<ObjectUrl, ObjectId>,
}

/// Hash of a command's type and binary-encoded parameters.
pub fn compute_parameter_hash(command: &dyn Command) -> Result<ObjectId, TransportError> {
  let mut builder = ObjectIdBuilder::new();
  builder.write_u32(COMMAND_HASH_VERSION);
  builder.write_str(command.type_name());
  builder.write_u8(0);
  builder.write(&command.encode(WireFormat::Binary)?);
  Ok(builder.compute_hash())
}

/// Compute the cache key of a command.
///
/// The parameter hash is folded with `ObjectId::combine` over every declared
/// input, each contributing the hash of its url combined with its current
/// version.
pub fn compute_command_hash(command: &dyn Command, ctx: &dyn PrepareContext) -> Result<CommandHash, CommandError> {
  let mut hash = compute_parameter_hash(command)?;
  let mut input_versions = BTreeMap::new();

  for url in command.input_files() {
    let version = ctx.compute_input_hash(&url)?;
    let url_hash = ObjectId::from_bytes(url.to_string().as_bytes());
    hash = ObjectId::combine(hash, ObjectId::combine(url_hash, version));
    input_versions.insert(url, version);
  }

  Ok(CommandHash { hash, input_versions })
}

/// What a running command sees of the engine.
///
/// Everything the command reads through `read_input` and writes through
/// `write_output` is recorded in the `CommandResultEntry` that gets cached
/// when the command succeeds.
pub struct CommandContext<'a> {
  context: &'a dyn ExecuteContext,
  logger: &'a Logger,
  entry: CommandResultEntry,
  spawned: Vec<Arc<BuildStep>>,
}

impl<'a> CommandContext<'a> {
  pub fn new(context: &'a dyn ExecuteContext, logger: &'a Logger) -> Self {
    Self {
      context,
      logger,
      entry: CommandResultEntry::new(),
      spawned: Vec::new(),
    }
  }

  /// Seed the recorded input versions, e.g. with those observed while hashing.
  pub fn with_input_versions(mut self, versions: BTreeMap<ObjectUrl, ObjectId>) -> Self {
    self.entry.input_dependency_versions.extend(versions);
    self
  }

  /// The step's logger.
  pub fn logger(&self) -> &Logger {
    self.logger
  }

  pub fn variables(&self) -> &BTreeMap<String, String> {
    self.context.variables()
  }

  pub fn variable(&self, key: &str) -> Option<&str> {
    self.context.variables().get(key).map(String::as_str)
  }

  pub fn cancellation(&self) -> &CancellationToken {
    self.context.cancellation()
  }

  pub fn is_cancelled(&self) -> bool {
    self.context.cancellation().is_cancelled()
  }

  pub fn compute_input_hash(&self, url: &ObjectUrl) -> Result<ObjectId, InputError> {
    self.context.compute_input_hash(url)
  }

  /// Record an input discovered during execution.
  ///
  /// A later cache hit requires this input to still have the returned version.
  pub fn register_input_dependency(&mut self, url: &ObjectUrl) -> Result<ObjectId, InputError> {
    let version = self.context.compute_input_hash(url)?;
    self.entry.input_dependency_versions.insert(url.clone(), version);
    Ok(version)
  }

  /// Object produced for `url` earlier in this build, oldest producer first.
  pub fn find_output(&self, url: &ObjectUrl) -> Option<ObjectId> {
    self
      .context
      .get_output_objects_groups()
      .iter()
      .find_map(|group| group.get(url).copied())
  }

  /// Read an input and record it as a dependency.
  pub async fn read_input(&mut self, url: &ObjectUrl) -> Result<Vec<u8>, CommandError> {
    self.register_input_dependency(url)?;
    match url.kind {
      UrlType::File => match tokio::fs::read(Path::new(&url.path)).await {
        Ok(data) => Ok(data),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(CommandError::MissingInput(url.clone())),
        Err(e) => Err(e.into()),
      },
      UrlType::Content => {
        let id = match self.find_output(url) {
          Some(id) => Some(id),
          None => self.context.result_map().resolve(url)?,
        };
        let Some(id) = id else {
          return Err(CommandError::MissingInput(url.clone()));
        };
        self
          .context
          .result_map()
          .read(&id)?
          .ok_or_else(|| CommandError::MissingInput(url.clone()))
      }
    }
  }

  /// Store bytes and record them as the output at `url`.
  pub fn write_output(&mut self, url: ObjectUrl, data: &[u8]) -> Result<ObjectId, CommandError> {
    let id = self.context.result_map().write(data)?;
    self.entry.output_objects.insert(url, id);
    Ok(id)
  }

  /// Record an already-stored object as an output.
  pub fn register_output(&mut self, url: ObjectUrl, id: ObjectId) {
    self.entry.output_objects.insert(url, id);
  }

  /// Attach a free-form symbol to an output.
  pub fn add_tag(&mut self, url: ObjectUrl, symbol: impl Into<String>) {
    self.entry.tag_symbols.push((url, symbol.into()));
  }

  /// Enqueue a step this command depends on finishing.
  ///
  /// The step runs concurrently; the command's own step does not complete,
  /// and fails, unless every scheduled step succeeds.
  pub fn schedule_build_step(&mut self, step: Arc<BuildStep>) -> Result<(), CommandError> {
    self.context.schedule_build_step(step.clone())?;
    self.spawned.push(step);
    Ok(())
  }

  pub fn output_objects(&self) -> &OutputObjects {
    &self.entry.output_objects
  }

  pub fn entry(&self) -> &CommandResultEntry {
    &self.entry
  }

  /// Merge a result produced elsewhere, e.g. by a remote worker.
  ///
  /// Input versions already recorded here are kept. Inputs only the other
  /// side reported are observed again through this context.
  pub fn merge_entry(&mut self, other: CommandResultEntry) -> Result<(), InputError> {
    for url in other.input_dependency_versions.keys() {
      if !self.entry.input_dependency_versions.contains_key(url) {
        self.register_input_dependency(url)?;
      }
    }
    self.entry.output_objects.extend(other.output_objects);
    self.entry.tag_symbols.extend(other.tag_symbols);
    Ok(())
  }

  /// The recorded entry and the steps scheduled during execution.
  pub fn into_parts(self) -> (CommandResultEntry, Vec<Arc<BuildStep>>) {
    (self.entry, self.spawned)
  }
}

impl fmt::Debug for CommandContext<'_> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CommandContext")
      .field("entry", &self.entry)
      .field("spawned", &self.spawned.len())
      .finish()
  }
}
