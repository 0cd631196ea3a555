//! Step result statuses and the per-build tally of them.

use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

/// Outcome of a build step.
///
/// `NotProcessed` is the only non-terminal value. A step moves from it to
/// exactly one of the others and stays there.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResultStatus {
  /// Created, not yet attempted.
  NotProcessed,
  /// Executed and produced valid outputs.
  Successful,
  /// Executed and the command reported failure, or the step was misconfigured.
  Failed,
  /// The build was cancelled before the step finished. Outputs are untrusted.
  Cancelled,
  /// Skipped because a cached result for identical inputs is still valid.
  NotTriggeredWasSuccessful,
  /// Skipped because a prerequisite did not succeed.
  NotTriggeredPrerequisiteFailed,
}

impl ResultStatus {
  pub const ALL: [ResultStatus; 6] = [
    ResultStatus::NotProcessed,
    ResultStatus::Successful,
    ResultStatus::Failed,
    ResultStatus::Cancelled,
    ResultStatus::NotTriggeredWasSuccessful,
    ResultStatus::NotTriggeredPrerequisiteFailed,
  ];

  pub fn ordinal(self) -> usize {
    self as usize
  }

  pub fn is_terminal(self) -> bool {
    self != ResultStatus::NotProcessed
  }

  /// Whether outputs of a step with this status can be consumed.
  pub fn is_successful(self) -> bool {
    matches!(
      self,
      ResultStatus::Successful | ResultStatus::NotTriggeredWasSuccessful
    )
  }

  /// Whether dependents of a step with this status must not run.
  pub fn blocks_dependents(self) -> bool {
    matches!(
      self,
      ResultStatus::Failed | ResultStatus::Cancelled | ResultStatus::NotTriggeredPrerequisiteFailed
    )
  }
}

impl fmt::Display for ResultStatus {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    let name = match self {
      ResultStatus::NotProcessed => "not processed",
      ResultStatus::Successful => "successful",
      ResultStatus::Failed => "failed",
      ResultStatus::Cancelled => "cancelled",
      ResultStatus::NotTriggeredWasSuccessful => "up to date",
      ResultStatus::NotTriggeredPrerequisiteFailed => "prerequisite failed",
    };
    f.write_str(name)
  }
}

/// Per-status counts, captured from a `StepCounter`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepCounts {
  pub not_processed: usize,
  pub successful: usize,
  pub failed: usize,
  pub cancelled: usize,
  pub up_to_date: usize,
  pub prerequisite_failed: usize,
  pub total: usize,
}

impl StepCounts {
  pub fn get(&self, status: ResultStatus) -> usize {
    match status {
      ResultStatus::NotProcessed => self.not_processed,
      ResultStatus::Successful => self.successful,
      ResultStatus::Failed => self.failed,
      ResultStatus::Cancelled => self.cancelled,
      ResultStatus::NotTriggeredWasSuccessful => self.up_to_date,
      ResultStatus::NotTriggeredPrerequisiteFailed => self.prerequisite_failed,
    }
  }
}

#[derive(Debug, Default)]
struct Counts {
  by_status: [usize; 6],
  total: usize,
}

/// Counts command step results for one build.
///
/// A single lock covers the per-status counts and the total, so `total`
/// always equals their sum.
#[derive(Debug, Default)]
pub struct StepCounter {
  inner: Mutex<Counts>,
}

impl StepCounter {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn add_step_result(&self, status: ResultStatus) {
    let mut counts = self.inner.lock();
    counts.by_status[status.ordinal()] += 1;
    counts.total += 1;
  }

  pub fn get(&self, status: ResultStatus) -> usize {
    self.inner.lock().by_status[status.ordinal()]
  }

  pub fn total(&self) -> usize {
    self.inner.lock().total
  }

  pub fn clear(&self) {
    *self.inner.lock() = Counts::default();
  }

  /// A consistent copy of all counts.
  pub fn snapshot(&self) -> StepCounts {
    let counts = self.inner.lock();
    let c = &counts.by_status;
    StepCounts {
      not_processed: c[ResultStatus::NotProcessed.ordinal()],
      successful: c[ResultStatus::Successful.ordinal()],
      failed: c[ResultStatus::Failed.ordinal()],
      cancelled: c[ResultStatus::Cancelled.ordinal()],
      up_to_date: c[ResultStatus::NotTriggeredWasSuccessful.ordinal()],
      prerequisite_failed: c[ResultStatus::NotTriggeredPrerequisiteFailed.ordinal()],
      total: counts.total,
    }
  }
}
