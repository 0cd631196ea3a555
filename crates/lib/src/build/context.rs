//! Execution contexts and per-session coordination state.
//!
//! - `PrepareContext` / `ExecuteContext`: what a command may ask of the engine
//! - `BuilderContext`: input hashes, the in-flight command registry and the
//!   optional remote executor for one build session
//! - `CancellationToken`: the single cancellation signal of a build run

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, warn};

use crate::diagnostics::Logger;
use crate::remote::RemoteExecutor;
use crate::storage::{InputVersionTracker, ObjectId, ObjectUrl, StoreError, TrackerError, UrlType};

use super::command::CommandError;
use super::result::ResultMap;
use super::status::ResultStatus;
use super::step::{BuildStep, StepId};

/// Failure to determine the current version of an input.
#[derive(Debug, Error)]
pub enum InputError {
  #[error(transparent)]
  Tracker(#[from] TrackerError),

  #[error(transparent)]
  Store(#[from] StoreError),
}

/// Outputs a step produced, keyed by url.
pub type OutputObjects = BTreeMap<ObjectUrl, ObjectId>;

/// Terminal status and outputs of a command step.
#[derive(Debug, Clone)]
pub struct StepOutcome {
  pub status: ResultStatus,
  pub outputs: Arc<OutputObjects>,
}

impl StepOutcome {
  pub fn new(status: ResultStatus, outputs: OutputObjects) -> Self {
    Self {
      status,
      outputs: Arc::new(outputs),
    }
  }

  /// An outcome without outputs.
  pub fn empty(status: ResultStatus) -> Self {
    Self::new(status, OutputObjects::new())
  }
}

/// Services available while preparing a command.
pub trait PrepareContext: Send + Sync {
  /// Session-wide logger.
  fn logger(&self) -> &Logger;

  /// Current version of an input.
  ///
  /// Reflects the tracker's present view of the file system and the index's
  /// present content, never a value remembered from an earlier build.
  fn compute_input_hash(&self, url: &ObjectUrl) -> Result<ObjectId, InputError>;
}

/// Services available while executing a command.
///
/// The three in-flight primitives have defaults suited to contexts that run a
/// single command at a time and so have nothing to deduplicate.
pub trait ExecuteContext: PrepareContext {
  fn cancellation(&self) -> &CancellationToken;

  fn result_map(&self) -> &ResultMap;

  /// Build-wide key/value configuration.
  fn variables(&self) -> &BTreeMap<String, String>;

  /// Enqueue a step discovered while executing a command.
  fn schedule_build_step(&self, step: Arc<BuildStep>) -> Result<(), CommandError>;

  /// Outputs of every command finished so far in this build, oldest first.
  fn get_output_objects_groups(&self) -> Vec<Arc<OutputObjects>>;

  /// The running command registered under `hash`, if any.
  fn is_command_currently_running(&self, _hash: &ObjectId) -> Option<InFlightCommand> {
    None
  }

  /// Register `step` as the executor of `hash`, or hand back the step that
  /// already is.
  fn notify_command_build_step_started(&self, step: &BuildStep, hash: ObjectId) -> CommandClaim {
    CommandClaim::Owner(InFlightRegistration::detached(hash, step.id()))
  }

  /// Drop the registration of `step` under `hash`.
  fn notify_command_build_step_finished(&self, _step: StepId, _hash: &ObjectId) {}
}

/// The shared signal cancelling a whole build run.
#[derive(Clone)]
pub struct CancellationToken {
  sender: Arc<watch::Sender<bool>>,
}

impl Default for CancellationToken {
  fn default() -> Self {
    Self::new()
  }
}

impl CancellationToken {
  pub fn new() -> Self {
    let (sender, _) = watch::channel(false);
    Self {
      sender: Arc::new(sender),
    }
  }

  pub fn cancel(&self) {
    self.sender.send_replace(true);
  }

  pub fn is_cancelled(&self) -> bool {
    *self.sender.borrow()
  }

  /// Resolves once `cancel` has been called.
  pub async fn cancelled(&self) {
    let mut receiver = self.sender.subscribe();
    // The sender lives in `self`, so this only returns once cancelled.
    let _ = receiver.wait_for(|cancelled| *cancelled).await;
  }
}

impl fmt::Debug for CancellationToken {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("CancellationToken")
      .field("cancelled", &self.is_cancelled())
      .finish()
  }
}

/// A handle on a command that is executing right now.
#[derive(Debug, Clone)]
pub struct InFlightCommand {
  pub step: StepId,
  pub title: String,
  outcome: watch::Receiver<Option<StepOutcome>>,
}

impl InFlightCommand {
  /// Wait for the owning step to finish and return its outcome.
  pub async fn wait(&self) -> StepOutcome {
    let mut receiver = self.outcome.clone();
    let outcome = match receiver.wait_for(Option::is_some).await {
      Ok(outcome) => outcome.clone(),
      Err(_) => None,
    };
    outcome.unwrap_or_else(|| StepOutcome::empty(ResultStatus::Failed))
  }
}

/// Registry of commands currently executing, keyed by command hash.
///
/// Every critical section is a single map operation.
#[derive(Debug, Default)]
pub struct InFlightRegistry {
  commands: Mutex<HashMap<ObjectId, InFlightCommand>>,
}

impl InFlightRegistry {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn get(&self, hash: &ObjectId) -> Option<InFlightCommand> {
    self.commands.lock().get(hash).cloned()
  }

  /// Atomically check for a running duplicate and register if there is none.
  pub fn claim(self: &Arc<Self>, hash: ObjectId, step: StepId, title: &str) -> CommandClaim {
    let mut commands = self.commands.lock();
    if let Some(running) = commands.get(&hash) {
      return CommandClaim::Duplicate(running.clone());
    }

    let (sender, receiver) = watch::channel(None);
    commands.insert(
      hash,
      InFlightCommand {
        step,
        title: title.to_string(),
        outcome: receiver,
      },
    );
    CommandClaim::Owner(InFlightRegistration {
      registry: Some(self.clone()),
      hash,
      step,
      sender,
      finished: false,
    })
  }

  /// Remove the entry for `hash` if `step` owns it.
  pub fn release(&self, step: StepId, hash: &ObjectId) {
    let mut commands = self.commands.lock();
    if commands.get(hash).is_some_and(|running| running.step == step) {
      commands.remove(hash);
    }
  }

  pub fn len(&self) -> usize {
    self.commands.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }
}

/// Result of trying to register a command as running.
#[derive(Debug)]
pub enum CommandClaim {
  /// This step executes the command and must finish the registration.
  Owner(InFlightRegistration),
  /// An identical command is already running.
  Duplicate(InFlightCommand),
}

/// Proof of being the registered executor of a command hash.
///
/// Finishing publishes the outcome to every waiter and removes the registry
/// entry. Dropping an unfinished registration publishes `Failed`, so waiters
/// are released even if the owner panics.
#[derive(Debug)]
pub struct InFlightRegistration {
  registry: Option<Arc<InFlightRegistry>>,
  hash: ObjectId,
  step: StepId,
  sender: watch::Sender<Option<StepOutcome>>,
  finished: bool,
}

impl InFlightRegistration {
  /// A registration not tracked by any registry.
  pub fn detached(hash: ObjectId, step: StepId) -> Self {
    let (sender, _) = watch::channel(None);
    Self {
      registry: None,
      hash,
      step,
      sender,
      finished: false,
    }
  }

  pub fn hash(&self) -> ObjectId {
    self.hash
  }

  pub fn finish(mut self, outcome: StepOutcome) {
    self.complete(outcome);
  }

  fn complete(&mut self, outcome: StepOutcome) {
    if self.finished {
      return;
    }
    self.finished = true;
    self.sender.send_replace(Some(outcome));
    if let Some(registry) = &self.registry {
      registry.release(self.step, &self.hash);
    }
  }
}

impl Drop for InFlightRegistration {
  fn drop(&mut self) {
    if !self.finished {
      debug!(command = %self.hash, "in-flight registration dropped unfinished");
      self.complete(StepOutcome::empty(ResultStatus::Failed));
    }
  }
}

/// Coordination state for one build session.
pub struct BuilderContext {
  input_hashes: Arc<dyn InputVersionTracker>,
  commands_in_progress: Arc<InFlightRegistry>,
  try_execute_remote: Option<Arc<dyn RemoteExecutor>>,
}

impl BuilderContext {
  pub fn new(input_hashes: Arc<dyn InputVersionTracker>, try_execute_remote: Option<Arc<dyn RemoteExecutor>>) -> Self {
    Self {
      input_hashes,
      commands_in_progress: Arc::new(InFlightRegistry::new()),
      try_execute_remote,
    }
  }

  pub fn input_hashes(&self) -> &dyn InputVersionTracker {
    self.input_hashes.as_ref()
  }

  pub fn commands_in_progress(&self) -> &Arc<InFlightRegistry> {
    &self.commands_in_progress
  }

  pub fn try_execute_remote(&self) -> Option<&Arc<dyn RemoteExecutor>> {
    self.try_execute_remote.as_ref()
  }

  /// Current version of an input.
  ///
  /// A missing file, or content not yet produced, hashes to `ObjectId::EMPTY`
  /// with a warning, so the command still gets a stable key and can report
  /// the missing input itself.
  pub fn compute_input_hash(
    &self,
    url: &ObjectUrl,
    results: &ResultMap,
    logger: &Logger,
  ) -> Result<ObjectId, InputError> {
    match url.kind {
      UrlType::File => match self.input_hashes.hash(Path::new(&url.path)) {
        Ok(id) => Ok(id),
        Err(TrackerError::NotFound(path)) => {
          warn!(input = %url, "input file not found");
          logger.warning(format!("input file not found: {}", path.display()));
          Ok(ObjectId::EMPTY)
        }
        Err(e) => Err(e.into()),
      },
      UrlType::Content => match results.resolve(url)? {
        Some(id) => Ok(id),
        None => {
          warn!(input = %url, "input content not found");
          logger.warning(format!("input content not found: {url}"));
          Ok(ObjectId::EMPTY)
        }
      },
    }
  }

  pub fn is_command_currently_running(&self, hash: &ObjectId) -> Option<InFlightCommand> {
    self.commands_in_progress.get(hash)
  }

  pub fn notify_command_build_step_started(&self, step: &BuildStep, hash: ObjectId) -> CommandClaim {
    self.commands_in_progress.claim(hash, step.id(), step.title())
  }

  pub fn notify_command_build_step_finished(&self, step: StepId, hash: &ObjectId) {
    self.commands_in_progress.release(step, hash);
  }
}

impl fmt::Debug for BuilderContext {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("BuilderContext")
      .field("commands_in_progress", &self.commands_in_progress.len())
      .field("remote", &self.try_execute_remote.is_some())
      .finish()
  }
}
