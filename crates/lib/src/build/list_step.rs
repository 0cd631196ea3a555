//! Execution of a list step: each child starts as soon as its own
//! prerequisites are done.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use tokio::task::{self, JoinSet};
use tracing::{debug, warn};

use super::builder::{BuildSession, execute_step};
use super::context::OutputObjects;
use super::graph::StepGraph;
use super::status::ResultStatus;
use super::step::{BuildStep, ListBuildStep, StepId};

/// Run every child of `list`, then finish `step` with the aggregate status.
pub(crate) async fn execute(session: &Arc<BuildSession>, step: &Arc<BuildStep>, list: &ListBuildStep) -> ResultStatus {
  let graph = list.graph();
  debug!(step = %step.id(), title = step.title(), steps = graph.len(), "running list step");

  let mut waiting_on = graph.in_degrees();
  let mut ready: VecDeque<Arc<BuildStep>> = graph
    .steps()
    .into_iter()
    .filter(|child| waiting_on.get(&child.id()) == Some(&0))
    .collect();
  let mut join_set = JoinSet::new();
  let mut running: HashMap<task::Id, Arc<BuildStep>> = HashMap::new();

  loop {
    while let Some(child) = ready.pop_front() {
      if session.cancellation.is_cancelled() {
        session.settle(&child, ResultStatus::Cancelled);
      } else if let Some(prerequisite) = failed_prerequisite(graph, &child) {
        warn!(
          step = %child.id(),
          title = child.title(),
          prerequisite = prerequisite.title(),
          "skipping step due to failed prerequisite"
        );
        child.logger().warning(format!(
          "skipped: prerequisite '{}' finished with status '{}'",
          prerequisite.title(),
          prerequisite.status()
        ));
        session.settle(&child, ResultStatus::NotTriggeredPrerequisiteFailed);
      } else {
        let handle = join_set.spawn(execute_step(session.clone(), child.clone()));
        running.insert(handle.id(), child);
        continue;
      }
      release_dependents(graph, &child, &mut waiting_on, &mut ready);
    }

    let Some(joined) = join_set.join_next_with_id().await else {
      break;
    };
    let id = match joined {
      Ok((id, status)) => {
        if let Some(child) = running.get(&id) {
          debug!(step = %child.id(), status = %status, "step task finished");
        }
        id
      }
      Err(e) => {
        if let Some(child) = running.get(&e.id()) {
          session.step_panicked(child, &e);
        }
        e.id()
      }
    };
    if let Some(child) = running.remove(&id) {
      release_dependents(graph, &child, &mut waiting_on, &mut ready);
    }
  }

  let children = list.steps();
  let status = aggregate_status(children.iter().map(|child| child.status()));

  if status.is_successful() {
    let mut outputs = OutputObjects::new();
    for child in &children {
      outputs.extend(child.outputs().iter().map(|(url, id)| (url.clone(), *id)));
    }
    step.set_outputs(Arc::new(outputs));
  }
  step.finish(status);
  step.status()
}

fn failed_prerequisite(graph: &StepGraph, child: &BuildStep) -> Option<Arc<BuildStep>> {
  graph
    .prerequisites(child.id())
    .into_iter()
    .find(|prerequisite| prerequisite.status().blocks_dependents())
}

/// Mark `done` finished for its dependents, queueing those with nothing
/// left to wait on.
fn release_dependents(
  graph: &StepGraph,
  done: &BuildStep,
  waiting_on: &mut HashMap<StepId, usize>,
  ready: &mut VecDeque<Arc<BuildStep>>,
) {
  for dependent in graph.dependents(done.id()) {
    if let Some(count) = waiting_on.get_mut(&dependent.id()) {
      *count = count.saturating_sub(1);
      if *count == 0 {
        ready.push_back(dependent);
      }
    }
  }
}

/// Status of a list given the statuses of its children.
///
/// Cancellation wins over failure, failure over success. A list whose
/// children were all up to date is itself up to date.
pub(crate) fn aggregate_status(statuses: impl IntoIterator<Item = ResultStatus>) -> ResultStatus {
  let mut any = false;
  let mut all_up_to_date = true;
  let mut failed = false;

  for status in statuses {
    any = true;
    match status {
      ResultStatus::Cancelled => return ResultStatus::Cancelled,
      ResultStatus::Failed | ResultStatus::NotTriggeredPrerequisiteFailed | ResultStatus::NotProcessed => failed = true,
      ResultStatus::Successful => all_up_to_date = false,
      ResultStatus::NotTriggeredWasSuccessful => {}
    }
  }

  if failed {
    ResultStatus::Failed
  } else if any && all_up_to_date {
    ResultStatus::NotTriggeredWasSuccessful
  } else {
    ResultStatus::Successful
  }
}
