//! The build scheduler.
//!
//! A `Builder` runs a root step tree to completion against an object
//! database. Each run gets a fresh `BuildSession` holding everything the
//! steps of that run share: the `BuilderContext`, the cancellation token,
//! the worker semaphore, the step counter and the session log.

use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use crate::diagnostics::{
  LogListener, LogMessageType, Logger, LoggerResult, SerializableLogMessage, TimestampedLog, TimestampedMessage,
  TracingListener,
};
use crate::remote::RemoteExecutor;
use crate::storage::{InputVersionTracker, ObjectDatabase, ObjectId, ObjectUrl};

use super::command::CommandError;
use super::context::{
  BuilderContext, CancellationToken, CommandClaim, ExecuteContext, InFlightCommand, InputError, OutputObjects,
  PrepareContext,
};
use super::result::ResultMap;
use super::status::{ResultStatus, StepCounter, StepCounts};
use super::step::{BuildStep, StepId, StepKind};
use super::{command_step, list_step};

/// Scheduler settings for a build run.
#[derive(Debug, Clone)]
pub struct BuilderConfig {
  /// Commands allowed to execute at the same time.
  pub parallelism: usize,
  /// Key/value configuration visible to every command.
  pub variables: BTreeMap<String, String>,
  /// Lowest severity kept in the session log of the report.
  pub min_log_level: LogMessageType,
}

impl Default for BuilderConfig {
  fn default() -> Self {
    Self {
      parallelism: num_cpus(),
      variables: BTreeMap::new(),
      min_log_level: LogMessageType::Info,
    }
  }
}

fn num_cpus() -> usize {
  std::thread::available_parallelism().map(|p| p.get()).unwrap_or(4)
}

/// Summary of a finished build run.
#[derive(Debug, Clone, Serialize)]
pub struct BuildReport {
  pub status: ResultStatus,
  /// Session log, filtered by `BuilderConfig::min_log_level`.
  pub log: Vec<SerializableLogMessage>,
  /// Command step results.
  pub counts: StepCounts,
  /// Outputs of the root step.
  pub outputs: OutputObjects,
  /// Every message of the run with its offset from the start.
  pub timeline: Vec<TimestampedMessage>,
  pub elapsed: Duration,
}

/// Runs step trees.
pub struct Builder {
  config: BuilderConfig,
  database: ObjectDatabase,
  tracker: Arc<dyn InputVersionTracker>,
  remote: Option<Arc<dyn RemoteExecutor>>,
  counter: Arc<StepCounter>,
}

impl Builder {
  pub fn new(config: BuilderConfig, database: ObjectDatabase, tracker: Arc<dyn InputVersionTracker>) -> Self {
    Self {
      config,
      database,
      tracker,
      remote: None,
      counter: Arc::new(StepCounter::new()),
    }
  }

  /// Try `remote` before executing any command locally.
  pub fn with_remote(mut self, remote: Arc<dyn RemoteExecutor>) -> Self {
    self.remote = Some(remote);
    self
  }

  pub fn config(&self) -> &BuilderConfig {
    &self.config
  }

  /// Command step results of the current or last run.
  pub fn step_counter(&self) -> &Arc<StepCounter> {
    &self.counter
  }

  pub fn result_map(&self) -> ResultMap {
    ResultMap::new(self.database.clone())
  }

  pub async fn run(&self, root: Arc<BuildStep>) -> BuildReport {
    self.run_with_cancellation(root, CancellationToken::new()).await
  }

  /// Run `root` and every step below it. Cancelling `cancellation` makes
  /// every step still pending finish as `Cancelled`.
  ///
  /// A step tree runs once; running a finished tree again reports its
  /// existing statuses.
  pub async fn run_with_cancellation(&self, root: Arc<BuildStep>, cancellation: CancellationToken) -> BuildReport {
    let start = Instant::now();
    self.counter.clear();

    let session_log = Arc::new(LoggerResult::new(self.config.min_log_level));
    let timeline = Arc::new(TimestampedLog::new(start));
    let listeners: Vec<Arc<dyn LogListener>> = vec![session_log.clone(), timeline.clone(), Arc::new(TracingListener)];

    let session = BuildSession::new(
      BuilderContext::new(self.tracker.clone(), self.remote.clone()),
      ResultMap::new(self.database.clone()),
      self.config.clone(),
      cancellation,
      self.counter.clone(),
      listeners,
    );

    info!(root = %root.id(), title = root.title(), parallelism = self.config.parallelism, "build started");

    let status = match tokio::spawn(execute_step(session.clone(), root.clone())).await {
      Ok(status) => status,
      Err(e) => {
        error!(step = %root.id(), error = %e, "root step task panicked");
        session.settle(&root, ResultStatus::Failed);
        root.status()
      }
    };
    session.drain_scheduled().await;

    let counts = self.counter.snapshot();
    let elapsed = start.elapsed();
    info!(
      status = %status,
      total = counts.total,
      successful = counts.successful,
      up_to_date = counts.up_to_date,
      failed = counts.failed,
      elapsed_ms = elapsed.as_millis() as u64,
      "build finished"
    );

    BuildReport {
      status,
      log: session_log.messages(),
      counts,
      outputs: root.outputs().as_ref().clone(),
      timeline: timeline.entries(),
      elapsed,
    }
  }
}

impl std::fmt::Debug for Builder {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Builder")
      .field("config", &self.config)
      .field("database", &self.database)
      .field("remote", &self.remote.is_some())
      .finish()
  }
}

/// State shared by every step of one build run.
pub(crate) struct BuildSession {
  this: Weak<BuildSession>,
  pub(crate) builder_context: BuilderContext,
  pub(crate) result_map: ResultMap,
  pub(crate) variables: BTreeMap<String, String>,
  pub(crate) cancellation: CancellationToken,
  pub(crate) semaphore: Semaphore,
  pub(crate) counter: Arc<StepCounter>,
  logger: Logger,
  output_groups: Mutex<Vec<Arc<OutputObjects>>>,
  /// Tasks of steps scheduled by commands during this run.
  scheduled: Mutex<JoinSet<()>>,
  listeners: Vec<Arc<dyn LogListener>>,
}

impl BuildSession {
  fn new(
    builder_context: BuilderContext,
    result_map: ResultMap,
    config: BuilderConfig,
    cancellation: CancellationToken,
    counter: Arc<StepCounter>,
    listeners: Vec<Arc<dyn LogListener>>,
  ) -> Arc<Self> {
    let logger = Logger::new("build");
    for listener in &listeners {
      logger.add_listener(listener.clone());
    }
    Arc::new_cyclic(|this| Self {
      this: this.clone(),
      builder_context,
      result_map,
      variables: config.variables,
      cancellation,
      semaphore: Semaphore::new(config.parallelism.max(1)),
      counter,
      logger,
      output_groups: Mutex::new(Vec::new()),
      scheduled: Mutex::new(JoinSet::new()),
      listeners,
    })
  }

  pub(crate) fn push_output_group(&self, outputs: Arc<OutputObjects>) {
    if !outputs.is_empty() {
      self.output_groups.lock().push(outputs);
    }
  }

  /// Give `step`, and every unfinished step below it, a terminal status
  /// without running it.
  pub(crate) fn settle(&self, step: &BuildStep, status: ResultStatus) {
    for child in step.children() {
      self.settle(&child, status);
    }
    self.finish_step(step, status);
  }

  /// Finish a step, counting it if it is a command step.
  pub(crate) fn finish_step(&self, step: &BuildStep, status: ResultStatus) -> bool {
    let changed = step.finish(status);
    if changed && matches!(step.kind(), StepKind::Command(_)) {
      self.counter.add_step_result(status);
    }
    changed
  }

  /// Wait for every scheduled step task, including ones scheduled while
  /// waiting.
  async fn drain_scheduled(&self) {
    loop {
      let mut tasks = std::mem::take(&mut *self.scheduled.lock());
      if tasks.is_empty() {
        break;
      }
      debug!(tasks = tasks.len(), "waiting for scheduled steps");
      while tasks.join_next().await.is_some() {}
    }
  }

  /// Record that a step's task panicked.
  pub(crate) fn step_panicked(&self, step: &BuildStep, err: &tokio::task::JoinError) {
    error!(step = %step.id(), title = step.title(), error = %err, "step task panicked");
    step.logger().error(format!("step task panicked: {err}"));
    self.settle(step, ResultStatus::Failed);
  }
}

impl PrepareContext for BuildSession {
  fn logger(&self) -> &Logger {
    &self.logger
  }

  fn compute_input_hash(&self, url: &ObjectUrl) -> Result<ObjectId, InputError> {
    self.builder_context.compute_input_hash(url, &self.result_map, &self.logger)
  }
}

impl ExecuteContext for BuildSession {
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
    let Some(session) = self.this.upgrade() else {
      return Err(CommandError::Unsupported("the build session has ended".to_string()));
    };
    let Ok(runtime) = tokio::runtime::Handle::try_current() else {
      return Err(CommandError::Unsupported("no async runtime to run scheduled steps on".to_string()));
    };

    debug!(step = %step.id(), title = step.title(), "scheduling discovered step");
    let task = async move {
      if let Err(e) = tokio::spawn(execute_step(session.clone(), step.clone())).await {
        session.step_panicked(&step, &e);
      }
    };
    self.scheduled.lock().spawn_on(task, &runtime);
    Ok(())
  }

  fn get_output_objects_groups(&self) -> Vec<Arc<OutputObjects>> {
    self.output_groups.lock().clone()
  }

  fn is_command_currently_running(&self, hash: &ObjectId) -> Option<InFlightCommand> {
    self.builder_context.is_command_currently_running(hash)
  }

  fn notify_command_build_step_started(&self, step: &BuildStep, hash: ObjectId) -> CommandClaim {
    self.builder_context.notify_command_build_step_started(step, hash)
  }

  fn notify_command_build_step_finished(&self, step: StepId, hash: &ObjectId) {
    self.builder_context.notify_command_build_step_finished(step, hash);
  }
}

pub(crate) type StepFuture = Pin<Box<dyn Future<Output = ResultStatus> + Send>>;

/// Run a step of any kind to a terminal status.
pub(crate) fn execute_step(session: Arc<BuildSession>, step: Arc<BuildStep>) -> StepFuture {
  Box::pin(async move {
    step.attach_listeners(&session.listeners);
    if !step.try_start() {
      return step.wait_completed().await;
    }

    match step.kind() {
      StepKind::Command(command) => command_step::execute(&session, &step, command.clone()).await,
      StepKind::List(list) => list_step::execute(&session, &step, list).await,
    }
  })
}
