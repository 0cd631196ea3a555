//! Build logging.
//!
//! Each build step owns a `Logger` whose listeners are the step's own
//! `LoggerResult`, the session-wide `LoggerResult` and a `TimestampedLog`.
//! Messages are `SerializableLogMessage`s so they can be cached with a
//! command's result and shipped back from a remote worker.

pub mod logger;
pub mod message;

pub use logger::{LogListener, Logger, LoggerResult, TimestampedLog, TimestampedMessage, TracingListener};
pub use message::{ExceptionInfo, LogMessageType, SerializableLogMessage};
