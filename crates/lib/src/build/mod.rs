//! The incremental build engine.
//!
//! A build is a tree of steps. Command steps wrap one `Command` each; list
//! steps hold child steps and the dependencies between them. The `Builder`
//! runs a tree in parallel, skipping commands whose cached result is still
//! valid and running identical commands only once.
//!
//! # Submodules
//!
//! - [`command`] - the `Command` trait, command hashing and `CommandContext`
//! - [`context`] - execution contexts, in-flight registry, cancellation
//! - [`result`] - cached result entries and the `ResultMap`
//! - [`status`] - `ResultStatus` and the `StepCounter`
//! - [`step`] / [`graph`] - build steps and list dependency graphs
//! - [`builder`] - the scheduler and its `BuildReport`

pub mod builder;
pub mod command;
mod command_step;
pub mod context;
pub mod graph;
mod list_step;
pub mod result;
pub mod status;
pub mod step;

pub use builder::{BuildReport, Builder, BuilderConfig};
pub use command::{Command, CommandContext, CommandError, CommandHash, compute_command_hash, compute_parameter_hash};
pub use context::{
  BuilderContext, CancellationToken, CommandClaim, ExecuteContext, InFlightCommand, InFlightRegistration,
  InFlightRegistry, InputError, OutputObjects, PrepareContext, StepOutcome,
};
pub use graph::{StepGraph, StepGraphError};
pub use result::{CommandResultEntry, ResultMap, ResultMapError};
pub use status::{ResultStatus, StepCounter, StepCounts};
pub use step::{BuildStep, ListBuildStep, StepId, StepKind};
