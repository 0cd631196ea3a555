//! Build steps: the schedulable units of a build.
//!
//! A step is either a command step, wrapping one `Command`, or a list step,
//! holding child steps and the dependencies between them. Every step owns a
//! logger and a status that moves exactly once from `NotProcessed` to a
//! terminal value.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::diagnostics::{LogListener, Logger, LoggerResult, SerializableLogMessage};
use crate::storage::ObjectId;

use super::command::Command;
use super::context::OutputObjects;
use super::graph::{StepGraph, StepGraphError};
use super::status::ResultStatus;

static NEXT_STEP_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a build step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StepId(u64);

impl StepId {
  fn next() -> Self {
    Self(NEXT_STEP_ID.fetch_add(1, Ordering::Relaxed))
  }

  pub const fn from_raw(raw: u64) -> Self {
    Self(raw)
  }

  pub fn as_u64(self) -> u64 {
    self.0
  }
}

impl fmt::Display for StepId {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    write!(f, "#{}", self.0)
  }
}

/// What a step does when dispatched.
pub enum StepKind {
  Command(Arc<dyn Command>),
  List(ListBuildStep),
}

/// A node of the build tree.
pub struct BuildStep {
  id: StepId,
  title: String,
  kind: StepKind,
  status: watch::Sender<ResultStatus>,
  outputs: Mutex<Arc<OutputObjects>>,
  spawned: Mutex<Vec<Arc<BuildStep>>>,
  command_hash: Mutex<Option<ObjectId>>,
  log: Arc<LoggerResult>,
  logger: Logger,
  session_attached: AtomicBool,
  started: AtomicBool,
}

impl BuildStep {
  fn new(title: String, kind: StepKind) -> Arc<Self> {
    let (status, _) = watch::channel(ResultStatus::NotProcessed);
    let log = Arc::new(LoggerResult::default());
    let logger = Logger::new(title.clone());
    logger.add_listener(log.clone());
    Arc::new(Self {
      id: StepId::next(),
      title,
      kind,
      status,
      outputs: Mutex::new(Arc::new(OutputObjects::new())),
      spawned: Mutex::new(Vec::new()),
      command_hash: Mutex::new(None),
      log,
      logger,
      session_attached: AtomicBool::new(false),
      started: AtomicBool::new(false),
    })
  }

  /// A step executing `command`.
  pub fn command(command: impl Command + 'static) -> Arc<Self> {
    Self::from_command(Arc::new(command))
  }

  pub fn from_command(command: Arc<dyn Command>) -> Arc<Self> {
    Self::new(command.title(), StepKind::Command(command))
  }

  /// A step running the steps of `list` in dependency order.
  pub fn list(title: impl Into<String>, list: ListBuildStep) -> Arc<Self> {
    Self::new(title.into(), StepKind::List(list))
  }

  pub fn id(&self) -> StepId {
    self.id
  }

  pub fn title(&self) -> &str {
    &self.title
  }

  pub fn kind(&self) -> &StepKind {
    &self.kind
  }

  pub fn command_ref(&self) -> Option<&Arc<dyn Command>> {
    match &self.kind {
      StepKind::Command(command) => Some(command),
      StepKind::List(_) => None,
    }
  }

  pub fn status(&self) -> ResultStatus {
    *self.status.borrow()
  }

  /// Move to a terminal status. Returns `false` if the step already had one.
  pub(crate) fn finish(&self, status: ResultStatus) -> bool {
    if !status.is_terminal() {
      return false;
    }
    self.status.send_if_modified(|current| {
      if current.is_terminal() {
        return false;
      }
      *current = status;
      true
    })
  }

  /// Claim the right to execute the step. Only the first caller gets `true`.
  pub(crate) fn try_start(&self) -> bool {
    !self.started.swap(true, Ordering::AcqRel)
  }

  /// Wait until the step reaches a terminal status.
  pub async fn wait_completed(&self) -> ResultStatus {
    let mut receiver = self.status.subscribe();
    match receiver.wait_for(|status| status.is_terminal()).await {
      Ok(status) => *status,
      Err(_) => ResultStatus::Failed,
    }
  }

  /// Outputs of the step; empty unless it completed successfully.
  pub fn outputs(&self) -> Arc<OutputObjects> {
    self.outputs.lock().clone()
  }

  pub(crate) fn set_outputs(&self, outputs: Arc<OutputObjects>) {
    *self.outputs.lock() = outputs;
  }

  /// Direct children: list members, or steps a command scheduled.
  pub fn children(&self) -> Vec<Arc<BuildStep>> {
    match &self.kind {
      StepKind::List(list) => list.steps(),
      StepKind::Command(_) => self.spawned.lock().clone(),
    }
  }

  pub(crate) fn add_spawned(&self, steps: impl IntoIterator<Item = Arc<BuildStep>>) {
    self.spawned.lock().extend(steps);
  }

  /// Cache key of a command step, once computed.
  pub fn command_hash(&self) -> Option<ObjectId> {
    *self.command_hash.lock()
  }

  pub(crate) fn set_command_hash(&self, hash: ObjectId) {
    *self.command_hash.lock() = Some(hash);
  }

  pub fn logger(&self) -> &Logger {
    &self.logger
  }

  /// The step's own accumulated log.
  pub fn log(&self) -> &Arc<LoggerResult> {
    &self.log
  }

  pub fn log_messages(&self) -> Vec<SerializableLogMessage> {
    self.log.messages()
  }

  /// Add session-wide listeners, once per step.
  pub(crate) fn attach_listeners(&self, listeners: &[Arc<dyn LogListener>]) {
    if self.session_attached.swap(true, Ordering::AcqRel) {
      return;
    }
    for listener in listeners {
      self.logger.add_listener(listener.clone());
    }
  }
}

impl fmt::Debug for BuildStep {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let kind = match &self.kind {
      StepKind::Command(command) => command.type_name(),
      StepKind::List(_) => "list",
    };
    f.debug_struct("BuildStep")
      .field("id", &self.id)
      .field("title", &self.title)
      .field("kind", &kind)
      .field("status", &self.status())
      .finish()
  }
}

/// Child steps and the dependencies between them.
#[derive(Default)]
pub struct ListBuildStep {
  graph: StepGraph,
}

impl ListBuildStep {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add a step and return it for use in `add_dependency`.
  pub fn add(&mut self, step: Arc<BuildStep>) -> Arc<BuildStep> {
    self.graph.add(step.clone());
    step
  }

  /// Declare that `dependent` must not start before `prerequisite` finishes,
  /// and must not run at all unless it succeeds.
  pub fn add_dependency(&mut self, prerequisite: &Arc<BuildStep>, dependent: &Arc<BuildStep>) -> Result<(), StepGraphError> {
    self.graph.add_dependency(prerequisite.id(), dependent.id())
  }

  pub fn steps(&self) -> Vec<Arc<BuildStep>> {
    self.graph.steps()
  }

  pub fn len(&self) -> usize {
    self.graph.len()
  }

  pub fn is_empty(&self) -> bool {
    self.graph.len() == 0
  }

  pub(crate) fn graph(&self) -> &StepGraph {
    &self.graph
  }
}
