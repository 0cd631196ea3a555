//! Multicast build logging.
//!
//! A `Logger` holds an explicit list of listeners and hands every message to
//! each of them. Listeners apply their own severity filters; the logger never
//! filters on their behalf.

use std::error::Error;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tracing::{debug, error, info, trace, warn};

use super::message::{ExceptionInfo, LogMessageType, SerializableLogMessage};

/// Receives log messages from one or more loggers.
pub trait LogListener: Send + Sync {
  fn on_message(&self, message: &SerializableLogMessage);
}

/// A named logger fanning out to its listeners.
pub struct Logger {
  module: Option<String>,
  listeners: RwLock<Vec<Arc<dyn LogListener>>>,
}

impl Logger {
  pub fn new(module: impl Into<String>) -> Self {
    Self {
      module: Some(module.into()),
      listeners: RwLock::new(Vec::new()),
    }
  }

  /// A logger without a module name.
  pub fn anonymous() -> Self {
    Self {
      module: None,
      listeners: RwLock::new(Vec::new()),
    }
  }

  pub fn module(&self) -> Option<&str> {
    self.module.as_deref()
  }

  pub fn add_listener(&self, listener: Arc<dyn LogListener>) {
    self.listeners.write().push(listener);
  }

  /// Deliver an already-built message, keeping its module and timestamp.
  ///
  /// Used to replay cached logs and logs received from a remote worker.
  pub fn forward(&self, message: &SerializableLogMessage) {
    // Clone the list so listeners may log re-entrantly.
    let listeners = self.listeners.read().clone();
    for listener in &listeners {
      listener.on_message(message);
    }
  }

  pub fn log(&self, kind: LogMessageType, text: impl Into<String>) {
    self.forward(&SerializableLogMessage::new(self.module.clone(), kind, text));
  }

  pub fn debug(&self, text: impl Into<String>) {
    self.log(LogMessageType::Debug, text);
  }

  pub fn verbose(&self, text: impl Into<String>) {
    self.log(LogMessageType::Verbose, text);
  }

  pub fn info(&self, text: impl Into<String>) {
    self.log(LogMessageType::Info, text);
  }

  pub fn warning(&self, text: impl Into<String>) {
    self.log(LogMessageType::Warning, text);
  }

  pub fn error(&self, text: impl Into<String>) {
    self.log(LogMessageType::Error, text);
  }

  pub fn fatal(&self, text: impl Into<String>) {
    self.log(LogMessageType::Fatal, text);
  }

  /// Log an error-severity message carrying an error's cause chain.
  pub fn error_with(&self, text: impl Into<String>, err: &(dyn Error + 'static)) {
    let message = SerializableLogMessage::new(self.module.clone(), LogMessageType::Error, text)
      .with_exception(ExceptionInfo::from_error(err));
    self.forward(&message);
  }
}

impl std::fmt::Debug for Logger {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.debug_struct("Logger")
      .field("module", &self.module)
      .field("listeners", &self.listeners.read().len())
      .finish()
  }
}

/// Accumulates messages at or above a minimum severity.
#[derive(Debug)]
pub struct LoggerResult {
  min_level: LogMessageType,
  messages: Mutex<Vec<SerializableLogMessage>>,
}

impl Default for LoggerResult {
  fn default() -> Self {
    Self::new(LogMessageType::Debug)
  }
}

impl LoggerResult {
  pub fn new(min_level: LogMessageType) -> Self {
    Self {
      min_level,
      messages: Mutex::new(Vec::new()),
    }
  }

  pub fn min_level(&self) -> LogMessageType {
    self.min_level
  }

  pub fn messages(&self) -> Vec<SerializableLogMessage> {
    self.messages.lock().clone()
  }

  /// Messages recorded after the first `mark` messages.
  pub fn messages_since(&self, mark: usize) -> Vec<SerializableLogMessage> {
    self.messages.lock().get(mark..).map(<[_]>::to_vec).unwrap_or_default()
  }

  pub fn len(&self) -> usize {
    self.messages.lock().len()
  }

  pub fn is_empty(&self) -> bool {
    self.len() == 0
  }

  pub fn has_errors(&self) -> bool {
    self.messages.lock().iter().any(|m| m.kind.is_error())
  }

  pub fn clear(&self) {
    self.messages.lock().clear();
  }
}

impl LogListener for LoggerResult {
  fn on_message(&self, message: &SerializableLogMessage) {
    if message.kind >= self.min_level {
      self.messages.lock().push(message.clone());
    }
  }
}

/// A message and the time elapsed between the log's start and its arrival.
#[derive(Debug, Clone, Serialize)]
pub struct TimestampedMessage {
  pub elapsed: Duration,
  pub message: SerializableLogMessage,
}

/// Records every message with its offset from a fixed start instant.
#[derive(Debug)]
pub struct TimestampedLog {
  start: Instant,
  entries: Mutex<Vec<TimestampedMessage>>,
}

impl Default for TimestampedLog {
  fn default() -> Self {
    Self::new(Instant::now())
  }
}

impl TimestampedLog {
  pub fn new(start: Instant) -> Self {
    Self {
      start,
      entries: Mutex::new(Vec::new()),
    }
  }

  pub fn start(&self) -> Instant {
    self.start
  }

  pub fn entries(&self) -> Vec<TimestampedMessage> {
    self.entries.lock().clone()
  }
}

impl LogListener for TimestampedLog {
  fn on_message(&self, message: &SerializableLogMessage) {
    self.entries.lock().push(TimestampedMessage {
      elapsed: self.start.elapsed(),
      message: message.clone(),
    });
  }
}

/// Re-emits build log messages as `tracing` events.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingListener;

impl LogListener for TracingListener {
  fn on_message(&self, message: &SerializableLogMessage) {
    let module = message.module.as_deref().unwrap_or("-");
    let exception = message.exception.as_ref().map(ToString::to_string);
    let exception = exception.as_deref();
    match message.kind {
      LogMessageType::Debug => trace!(module, exception, "{}", message.text),
      LogMessageType::Verbose => debug!(module, exception, "{}", message.text),
      LogMessageType::Info => info!(module, exception, "{}", message.text),
      LogMessageType::Warning => warn!(module, exception, "{}", message.text),
      LogMessageType::Error | LogMessageType::Fatal => error!(module, exception, "{}", message.text),
    }
  }
}
