//! Generic commands shipped with the engine.
//!
//! `ImportFileCommand` copies a source file into the content store and
//! `ConcatCommand` joins several inputs into one output. Together with the
//! JSON build plans of [`plan`] they drive the engine from the command line.

pub mod plan;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::build::{Command, CommandContext, CommandError, ResultMap, ResultStatus};
use crate::remote::{CommandRegistry, RemoteCommand, TransportError, WireFormat};
use crate::storage::{ObjectUrl, UrlType};

pub use plan::{PlanError, load_plan, parse_plan};

/// Register every builtin command type.
pub fn register_builtins(registry: &mut CommandRegistry) {
  registry.register::<ImportFileCommand>().register::<ConcatCommand>();
}

/// Copies a file into the content store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportFileCommand {
  pub source: String,
  pub location: ObjectUrl,
}

impl ImportFileCommand {
  pub fn new(source: impl Into<String>, location: ObjectUrl) -> Self {
    Self {
      source: source.into(),
      location,
    }
  }

  fn source_url(&self) -> ObjectUrl {
    ObjectUrl::file(self.source.clone())
  }
}

impl RemoteCommand for ImportFileCommand {
  const TYPE_NAME: &'static str = "builtin.import-file";
}

#[async_trait]
impl Command for ImportFileCommand {
  fn type_name(&self) -> &'static str {
    Self::TYPE_NAME
  }

  fn title(&self) -> String {
    format!("import {}", self.source)
  }

  fn input_files(&self) -> Vec<ObjectUrl> {
    vec![self.source_url()]
  }

  fn encode(&self, format: WireFormat) -> Result<Vec<u8>, TransportError> {
    format.serialize(self)
  }

  fn validate(&self) -> Result<(), CommandError> {
    if self.source.is_empty() {
      return Err(CommandError::InvalidParameters("import source is empty".to_string()));
    }
    validate_location(&self.location)
  }

  async fn execute(&self, ctx: &mut CommandContext<'_>) -> Result<ResultStatus, CommandError> {
    let data = ctx.read_input(&self.source_url()).await?;
    let id = ctx.write_output(self.location.clone(), &data)?;
    ctx
      .logger()
      .verbose(format!("imported {} bytes into {} as {id}", data.len(), self.location));
    Ok(ResultStatus::Successful)
  }
}

/// Joins inputs, in order, into a single output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcatCommand {
  pub sources: Vec<ObjectUrl>,
  pub location: ObjectUrl,
  #[serde(default)]
  pub separator: String,
}

impl ConcatCommand {
  pub fn new(sources: Vec<ObjectUrl>, location: ObjectUrl) -> Self {
    Self {
      sources,
      location,
      separator: String::new(),
    }
  }

  pub fn with_separator(mut self, separator: impl Into<String>) -> Self {
    self.separator = separator.into();
    self
  }
}

impl RemoteCommand for ConcatCommand {
  const TYPE_NAME: &'static str = "builtin.concat";
}

#[async_trait]
impl Command for ConcatCommand {
  fn type_name(&self) -> &'static str {
    Self::TYPE_NAME
  }

  fn title(&self) -> String {
    format!("concat {}", self.location)
  }

  fn input_files(&self) -> Vec<ObjectUrl> {
    self.sources.clone()
  }

  fn encode(&self, format: WireFormat) -> Result<Vec<u8>, TransportError> {
    format.serialize(self)
  }

  fn validate(&self) -> Result<(), CommandError> {
    if self.sources.is_empty() {
      return Err(CommandError::InvalidParameters("concat needs at least one source".to_string()));
    }
    validate_location(&self.location)
  }

  async fn execute(&self, ctx: &mut CommandContext<'_>) -> Result<ResultStatus, CommandError> {
    let mut joined = Vec::new();
    for (i, source) in self.sources.iter().enumerate() {
      if ctx.is_cancelled() {
        return Err(CommandError::Cancelled);
      }
      if i > 0 {
        joined.extend_from_slice(self.separator.as_bytes());
      }
      joined.extend(ctx.read_input(source).await?);
    }
    ctx.write_output(self.location.clone(), &joined)?;
    ctx
      .logger()
      .verbose(format!("joined {} inputs into {}", self.sources.len(), self.location));
    Ok(ResultStatus::Successful)
  }
}

fn validate_location(location: &ObjectUrl) -> Result<(), CommandError> {
  if location.kind != UrlType::Content {
    return Err(CommandError::InvalidParameters(format!(
      "output location must be a content url, got {location}"
    )));
  }
  if ResultMap::is_reserved_location(location) {
    return Err(CommandError::InvalidParameters(format!(
      "output location {location} is reserved for cached results"
    )));
  }
  Ok(())
}
