//! Out-of-process command execution.
//!
//! - `wire`: the versioned envelope and the two payload encodings
//! - `registry`: rebuilding commands from their type name
//! - `executor`: the engine side, spawning a worker per command
//! - `worker`: the worker side, serving one request

pub mod executor;
pub mod registry;
pub mod wire;
pub mod worker;

pub use executor::{
  HostState, ProcessRemoteConfig, ProcessRemoteExecutor, RemoteError, RemoteExecutor, RemoteOutcome, RemoteRequest,
  RemoteResponse,
};
pub use registry::{CommandRegistry, RemoteCommand};
pub use wire::{Envelope, EnvelopeKind, TransportError, WireFormat};
pub use worker::{WorkerContext, WorkerError, run_worker, serve_stdio};
