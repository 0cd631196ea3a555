//! Log messages that can cross a process boundary.

use std::error::Error;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Severity of a build log message, least severe first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LogMessageType {
  Debug,
  Verbose,
  Info,
  Warning,
  Error,
  Fatal,
}

impl LogMessageType {
  pub fn is_error(self) -> bool {
    self >= LogMessageType::Error
  }
}

impl fmt::Display for LogMessageType {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      LogMessageType::Debug => "Debug",
      LogMessageType::Verbose => "Verbose",
      LogMessageType::Info => "Info",
      LogMessageType::Warning => "Warning",
      LogMessageType::Error => "Error",
      LogMessageType::Fatal => "Fatal",
    };
    f.write_str(name)
  }
}

/// Summary of an error and its chain of causes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExceptionInfo {
  pub message: String,
  pub causes: Vec<String>,
}

impl ExceptionInfo {
  pub fn from_error(err: &(dyn Error + 'static)) -> Self {
    let mut causes = Vec::new();
    let mut source = err.source();
    while let Some(cause) = source {
      causes.push(cause.to_string());
      source = cause.source();
    }
    Self {
      message: err.to_string(),
      causes,
    }
  }
}

impl fmt::Display for ExceptionInfo {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.write_str(&self.message)?;
    for cause in &self.causes {
      write!(f, ": {cause}")?;
    }
    Ok(())
  }
}

/// A log message in a form every wire format can carry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SerializableLogMessage {
  /// Name of the logger that produced the message.
  pub module: Option<String>,
  pub kind: LogMessageType,
  pub text: String,
  pub timestamp: DateTime<Utc>,
  pub exception: Option<ExceptionInfo>,
}

impl SerializableLogMessage {
  pub fn new(module: Option<String>, kind: LogMessageType, text: impl Into<String>) -> Self {
    Self {
      module,
      kind,
      text: text.into(),
      timestamp: Utc::now(),
      exception: None,
    }
  }

  pub fn with_exception(mut self, exception: ExceptionInfo) -> Self {
    self.exception = Some(exception);
    self
  }
}

impl fmt::Display for SerializableLogMessage {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    if let Some(module) = &self.module {
      write!(f, "[{module}]: ")?;
    }
    write!(f, "{}: {}", self.kind, self.text)?;
    if let Some(exception) = &self.exception {
      write!(f, ". {exception}")?;
    }
    Ok(())
  }
}
