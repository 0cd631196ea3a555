//! The worker side of remote execution.
//!
//! A worker reads one request envelope, rebuilds the command through a
//! `CommandRegistry`, runs it against the shared object database and answers
//! with the status and the full result entry, logs included. Input versions
//! and earlier outputs come from the engine's `HostState`, so the command
//! sees the build the way the engine does.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncWrite};
use tracing::{debug, info, warn};

use crate::build::{
  BuildStep, BuilderContext, CancellationToken, CommandContext, CommandError, CommandResultEntry, ExecuteContext, InputError,
  OutputObjects, PrepareContext, ResultMap, ResultStatus,
};
use crate::diagnostics::{LogListener, Logger, LoggerResult, TracingListener};
use crate::storage::{FileVersionTracker, ObjectDatabase, ObjectId, ObjectUrl, StoreError};

use super::executor::{HostState, RemoteOutcome, RemoteRequest, RemoteResponse};
use super::registry::CommandRegistry;
use super::wire::{Envelope, EnvelopeKind, TransportError, WireFormat};

#[derive(Debug, Error)]
pub enum WorkerError {
  #[error(transparent)]
  Transport(#[from] TransportError),

  #[error("failed to open object database: {0}")]
  Store(#[from] StoreError),
}

/// Execution context of a worker: one command, no scheduling, no dedup.
pub struct WorkerContext {
  logger: Logger,
  builder: BuilderContext,
  result_map: ResultMap,
  variables: BTreeMap<String, String>,
  input_versions: BTreeMap<ObjectUrl, ObjectId>,
  output_groups: Vec<Arc<OutputObjects>>,
  cancellation: CancellationToken,
}

impl WorkerContext {
  pub fn new(database: ObjectDatabase, host: HostState) -> Self {
    Self {
      logger: Logger::new("worker"),
      builder: BuilderContext::new(Arc::new(FileVersionTracker::new()), None),
      result_map: ResultMap::new(database),
      variables: host.variables,
      input_versions: host.input_versions,
      output_groups: host.output_groups.into_iter().map(Arc::new).collect(),
      cancellation: CancellationToken::new(),
    }
  }
}

impl PrepareContext for WorkerContext {
  fn logger(&self) -> &Logger {
    &self.logger
  }

  fn compute_input_hash(&self, url: &ObjectUrl) -> Result<ObjectId, InputError> {
    if let Some(version) = self.input_versions.get(url) {
      return Ok(*version);
    }
    self.builder.compute_input_hash(url, &self.result_map, &self.logger)
  }
}

impl ExecuteContext for WorkerContext {
  fn cancellation(&self) -> &CancellationToken {
    &self.cancellation
  }

  fn result_map(&self) -> &ResultMap {
    &self.result_map
  }

  fn variables(&self) -> &BTreeMap<String, String> {
    &self.variables
  }

  fn schedule_build_step(&self, step: Arc<BuildStep>) -> Result<(), CommandError> {
    Err(CommandError::Unsupported(format!(
      "remote workers cannot schedule build steps ({})",
      step.title()
    )))
  }

  fn get_output_objects_groups(&self) -> Vec<Arc<OutputObjects>> {
    self.output_groups.clone()
  }
}

/// Serve one request read from `reader`, answering on `writer`.
///
/// Commands the registry does not know, or whose parameters do not decode,
/// are answered with `Rejected` so the engine runs them itself.
pub async fn run_worker<R, W>(
  registry: &CommandRegistry,
  database: ObjectDatabase,
  format: WireFormat,
  reader: &mut R,
  writer: &mut W,
) -> Result<(), WorkerError>
where
  R: AsyncRead + Unpin,
  W: AsyncWrite + Unpin,
{
  let request: RemoteRequest = Envelope::read_from(reader).await?.open(EnvelopeKind::Request, format)?;
  debug!(command = %request.command_type, format = %format, "received remote request");

  let response = match registry.deserialize(&request.command_type, &request.parameters, format) {
    Ok(command) => {
      let context = WorkerContext::new(database, request.host);
      let logger = Logger::new(command.title());
      let captured = Arc::new(LoggerResult::default());
      logger.add_listener(captured.clone());
      logger.add_listener(Arc::new(TracingListener) as Arc<dyn LogListener>);

      let (status, mut entry) = match command.validate() {
        Err(e) => {
          logger.error_with("invalid command parameters", &e);
          (ResultStatus::Failed, CommandResultEntry::new())
        }
        Ok(()) => {
          let mut ctx = CommandContext::new(&context, &logger);
          let status = match command.execute(&mut ctx).await {
            Ok(status) if status.is_terminal() => status,
            Ok(status) => {
              logger.warning(format!("command returned non-terminal status {status}"));
              ResultStatus::Failed
            }
            Err(CommandError::Cancelled) => ResultStatus::Cancelled,
            Err(e) => {
              logger.error_with("command failed", &e);
              ResultStatus::Failed
            }
          };
          let (entry, _) = ctx.into_parts();
          (status, entry)
        }
      };

      entry.log_messages = captured.messages();
      info!(command = %request.command_type, status = %status, "remote command finished");
      RemoteResponse::Completed(RemoteOutcome { status, entry })
    }
    Err(e) => {
      warn!(command = %request.command_type, error = %e, "rejecting remote request");
      RemoteResponse::Rejected(e.to_string())
    }
  };

  Envelope::wrap(EnvelopeKind::Response, format, &response)?
    .write_to(writer)
    .await?;
  Ok(())
}

/// Serve one request over the process's stdin and stdout against the
/// database rooted at `store_root`.
pub async fn serve_stdio(registry: &CommandRegistry, store_root: &Path, format: WireFormat) -> Result<(), WorkerError> {
  let database = ObjectDatabase::open(store_root)?;
  let mut stdin = tokio::io::stdin();
  let mut stdout = tokio::io::stdout();
  run_worker(registry, database, format, &mut stdin, &mut stdout).await
}
