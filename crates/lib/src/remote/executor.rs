//! Out-of-process command execution.

use std::collections::BTreeMap;
use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info};

use crate::build::{Command, CommandResultEntry, OutputObjects, ResultStatus};
use crate::storage::{ObjectId, ObjectUrl};

use super::registry::CommandRegistry;
use super::wire::{Envelope, EnvelopeKind, TransportError, WireFormat};

/// Errors from the remote execution path. The engine answers all of them by
/// running the command locally.
#[derive(Debug, Error)]
pub enum RemoteError {
  #[error(transparent)]
  Transport(#[from] TransportError),

  #[error("failed to start remote worker {program}: {source}")]
  Spawn {
    program: PathBuf,
    #[source]
    source: io::Error,
  },

  #[error("remote worker did not answer within {0:?}")]
  Timeout(Duration),
}

/// Engine state a remotely executed command sees in place of the worker's own.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostState {
  pub variables: BTreeMap<String, String>,
  /// Input versions the engine observed for the command. The worker
  /// reports these instead of hashing the inputs itself.
  pub input_versions: BTreeMap<ObjectUrl, ObjectId>,
  /// Outputs published earlier in the build, oldest producer first.
  pub output_groups: Vec<OutputObjects>,
}

/// A command shipped to a worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRequest {
  pub command_type: String,
  /// Command parameters, encoded with the same format as the request.
  pub parameters: Vec<u8>,
  pub host: HostState,
}

/// What a worker produced for a command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteOutcome {
  pub status: ResultStatus,
  pub entry: CommandResultEntry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RemoteResponse {
  Completed(RemoteOutcome),
  /// The worker declined the command, e.g. because it does not know its type.
  Rejected(String),
}

/// Runs commands somewhere other than the current process.
#[async_trait]
pub trait RemoteExecutor: Send + Sync {
  /// Execute `command` remotely.
  ///
  /// `Ok(None)` means the executor declined and the command should run
  /// locally.
  async fn try_execute(&self, command: &dyn Command, host: &HostState) -> Result<Option<RemoteOutcome>, RemoteError>;
}

/// How to start a worker process.
#[derive(Debug, Clone)]
pub struct ProcessRemoteConfig {
  pub program: PathBuf,
  pub args: Vec<String>,
  pub format: WireFormat,
  pub timeout: Duration,
}

impl ProcessRemoteConfig {
  pub fn new(program: impl Into<PathBuf>) -> Self {
    Self {
      program: program.into(),
      args: Vec::new(),
      format: WireFormat::default(),
      timeout: Duration::from_secs(300),
    }
  }

  pub fn with_args<I, S>(mut self, args: I) -> Self
  where
    I: IntoIterator<Item = S>,
    S: Into<String>,
  {
    self.args = args.into_iter().map(Into::into).collect();
    self
  }

  pub fn with_format(mut self, format: WireFormat) -> Self {
    self.format = format;
    self
  }

  pub fn with_timeout(mut self, timeout: Duration) -> Self {
    self.timeout = timeout;
    self
  }
}

/// Executes each command in a freshly spawned worker process, one request
/// on stdin and one response on stdout.
#[derive(Debug, Clone)]
pub struct ProcessRemoteExecutor {
  config: ProcessRemoteConfig,
  registry: CommandRegistry,
}

impl ProcessRemoteExecutor {
  /// `registry` lists the command types the worker can rebuild; others are
  /// declined without starting a process.
  pub fn new(config: ProcessRemoteConfig, registry: CommandRegistry) -> Self {
    Self { config, registry }
  }

  pub fn config(&self) -> &ProcessRemoteConfig {
    &self.config
  }
}

#[async_trait]
impl RemoteExecutor for ProcessRemoteExecutor {
  async fn try_execute(&self, command: &dyn Command, host: &HostState) -> Result<Option<RemoteOutcome>, RemoteError> {
    let format = self.config.format;
    if !self.registry.contains(command.type_name()) {
      debug!(command = command.type_name(), "command type not supported remotely");
      return Ok(None);
    }

    let request = RemoteRequest {
      command_type: command.type_name().to_string(),
      parameters: command.encode(format)?,
      host: host.clone(),
    };
    let envelope = Envelope::wrap(EnvelopeKind::Request, format, &request)?;

    let mut child = tokio::process::Command::new(&self.config.program)
      .args(&self.config.args)
      .stdin(Stdio::piped())
      .stdout(Stdio::piped())
      .stderr(Stdio::inherit())
      .kill_on_drop(true)
      .spawn()
      .map_err(|source| RemoteError::Spawn {
        program: self.config.program.clone(),
        source,
      })?;

    let (Some(mut stdin), Some(mut stdout)) = (child.stdin.take(), child.stdout.take()) else {
      return Err(TransportError::Io(io::Error::other("worker stdio not captured")).into());
    };

    info!(
      command = command.type_name(),
      program = %self.config.program.display(),
      format = %format,
      "dispatching command to remote worker"
    );

    let exchange = async {
      envelope.write_to(&mut stdin).await?;
      drop(stdin);
      Envelope::read_from(&mut stdout).await
    };
    let response = tokio::time::timeout(self.config.timeout, exchange)
      .await
      .map_err(|_| RemoteError::Timeout(self.config.timeout))??;

    // The answer is in; the exit status adds nothing.
    if let Ok(Ok(status)) = tokio::time::timeout(Duration::from_secs(5), child.wait()).await {
      debug!(status = %status, "remote worker exited");
    }

    match response.open::<RemoteResponse>(EnvelopeKind::Response, format)? {
      RemoteResponse::Completed(outcome) => Ok(Some(outcome)),
      RemoteResponse::Rejected(reason) => {
        debug!(command = command.type_name(), reason = %reason, "remote worker declined command");
        Ok(None)
      }
    }
  }
}
