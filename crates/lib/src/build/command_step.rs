//! Execution of a single command step.
//!
//! The protocol, in order:
//!
//! 1. validate the command and compute its hash
//! 2. reuse a cached result whose inputs are unchanged and outputs present
//! 3. register as the executor of the hash, or wait for the step that is
//! 4. execute, remotely if an executor accepts the command, else locally
//! 5. wait for steps the command scheduled, whatever it returned
//! 6. publish outputs and store the result entry

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::diagnostics::Logger;
use crate::remote::HostState;
use crate::storage::{ObjectId, ObjectUrl};

use super::builder::BuildSession;
use super::command::{Command, CommandContext, CommandError, CommandHash, compute_command_hash};
use super::context::{CommandClaim, ExecuteContext, InFlightCommand, PrepareContext, StepOutcome};
use super::status::ResultStatus;
use super::step::BuildStep;

/// Run a command step to a terminal status.
pub(crate) async fn execute(session: &Arc<BuildSession>, step: &Arc<BuildStep>, command: Arc<dyn Command>) -> ResultStatus {
  let outcome = run(session, step, command.as_ref()).await;
  let status = outcome.status;

  if status.is_successful() {
    step.set_outputs(outcome.outputs.clone());
    session.push_output_group(outcome.outputs);
  }
  session.finish_step(step, status);

  debug!(step = %step.id(), title = step.title(), status = %status, "command step finished");
  step.status()
}

async fn run(session: &Arc<BuildSession>, step: &Arc<BuildStep>, command: &dyn Command) -> StepOutcome {
  let logger = step.logger();

  if session.cancellation.is_cancelled() {
    return StepOutcome::empty(ResultStatus::Cancelled);
  }

  if let Err(e) = command.validate() {
    logger.error_with("invalid command parameters", &e);
    return StepOutcome::empty(ResultStatus::Failed);
  }

  let CommandHash { hash, input_versions } = match compute_command_hash(command, session.as_ref()) {
    Ok(hash) => hash,
    Err(e) => {
      logger.error_with("failed to compute command hash", &e);
      return StepOutcome::empty(ResultStatus::Failed);
    }
  };
  step.set_command_hash(hash);

  if let Some(outcome) = try_cached(session, step, &hash) {
    return outcome;
  }

  let registration = match session.notify_command_build_step_started(step, hash) {
    CommandClaim::Owner(registration) => registration,
    CommandClaim::Duplicate(running) => return wait_for_duplicate(session, step, running).await,
  };

  // An identical step may have finished between the lookup and the claim.
  if let Some(outcome) = try_cached(session, step, &hash) {
    registration.finish(outcome.clone());
    return outcome;
  }

  let outcome = execute_owned(session, step, command, hash, input_versions).await;
  registration.finish(outcome.clone());
  outcome
}

/// A still-valid cached result for `hash`, with its outputs republished and
/// its log replayed through the step logger.
fn try_cached(session: &BuildSession, step: &BuildStep, hash: &ObjectId) -> Option<StepOutcome> {
  let logger = step.logger();
  let entry = match session.result_map.load_result(hash) {
    Ok(Some(entry)) => entry,
    Ok(None) => return None,
    Err(e) => {
      warn!(step = %step.id(), hash = %hash, error = %e, "ignoring unreadable cached result");
      logger.warning(format!("ignoring unreadable cached result: {e}"));
      return None;
    }
  };

  for (url, recorded) in &entry.input_dependency_versions {
    match session.compute_input_hash(url) {
      Ok(current) if current == *recorded => {}
      Ok(_) => {
        debug!(step = %step.id(), input = %url, "input changed since cached run");
        return None;
      }
      Err(e) => {
        debug!(step = %step.id(), input = %url, error = %e, "cannot verify cached input");
        return None;
      }
    }
  }

  for id in entry.output_objects.values() {
    if !matches!(session.result_map.contains(id), Ok(true)) {
      debug!(step = %step.id(), object = %id, "cached output missing from store");
      return None;
    }
  }

  if let Err(e) = session.result_map.publish_outputs(&entry.output_objects) {
    warn!(step = %step.id(), error = %e, "failed to republish cached outputs");
    logger.warning(format!("failed to republish cached outputs: {e}"));
    return None;
  }

  for message in &entry.log_messages {
    logger.forward(message);
  }
  info!(step = %step.id(), title = step.title(), hash = %hash, "up to date");
  Some(StepOutcome::new(ResultStatus::NotTriggeredWasSuccessful, entry.output_objects))
}

async fn wait_for_duplicate(session: &BuildSession, step: &BuildStep, running: InFlightCommand) -> StepOutcome {
  debug!(step = %step.id(), owner = %running.step, "waiting for identical command");
  step
    .logger()
    .verbose(format!("waiting for identical command {} ({})", running.step, running.title));

  tokio::select! {
    outcome = running.wait() => outcome,
    () = session.cancellation.cancelled() => StepOutcome::empty(ResultStatus::Cancelled),
  }
}

async fn execute_owned(
  session: &Arc<BuildSession>,
  step: &Arc<BuildStep>,
  command: &dyn Command,
  hash: ObjectId,
  input_versions: BTreeMap<ObjectUrl, ObjectId>,
) -> StepOutcome {
  let logger = step.logger();

  let permit = tokio::select! {
    permit = session.semaphore.acquire() => permit,
    () = session.cancellation.cancelled() => return StepOutcome::empty(ResultStatus::Cancelled),
  };
  let Ok(permit) = permit else {
    logger.error("scheduler shut down before the command could run");
    return StepOutcome::empty(ResultStatus::Failed);
  };

  let mark = step.log().len();
  let mut ctx = CommandContext::new(session.as_ref(), logger).with_input_versions(input_versions);

  let mut status = match execute_remote(session, logger, command, &mut ctx).await {
    Some(status) => status,
    None => execute_local(session, logger, command, &mut ctx).await,
  };

  status = match status {
    ResultStatus::Successful | ResultStatus::Failed | ResultStatus::Cancelled => status,
    other => {
      logger.error(format!("command finished with status '{other}'"));
      ResultStatus::Failed
    }
  };
  drop(permit);

  let (mut entry, spawned) = ctx.into_parts();
  step.add_spawned(spawned.iter().cloned());

  // Scheduled steps are awaited whatever the command returned.
  for child in &spawned {
    let child_status = child.wait_completed().await;
    if status != ResultStatus::Successful || child_status.is_successful() {
      continue;
    }
    if child_status == ResultStatus::Cancelled {
      status = ResultStatus::Cancelled;
    } else {
      logger.error(format!("scheduled step '{}' finished with status '{child_status}'", child.title()));
      status = ResultStatus::Failed;
    }
  }

  // Nothing is published or cached once the build is cancelled.
  if session.cancellation.is_cancelled() && status != ResultStatus::Cancelled {
    debug!(step = %step.id(), status = %status, "discarding result of cancelled build");
    status = ResultStatus::Cancelled;
  }

  if status != ResultStatus::Successful {
    return StepOutcome::empty(status);
  }

  if let Err(e) = session.result_map.publish_outputs(&entry.output_objects) {
    logger.error_with("failed to publish outputs", &e);
    return StepOutcome::empty(ResultStatus::Failed);
  }

  entry.log_messages = step.log().messages_since(mark);
  if let Err(e) = session.result_map.store_result(&hash, &entry) {
    warn!(step = %step.id(), hash = %hash, error = %e, "failed to store command result");
    logger.warning(format!("failed to store command result: {e}"));
  }

  info!(step = %step.id(), title = step.title(), hash = %hash, outputs = entry.output_objects.len(), "built");
  StepOutcome::new(ResultStatus::Successful, entry.output_objects)
}

/// Offer the command to the remote executor. `None` means run it locally.
async fn execute_remote(
  session: &BuildSession,
  logger: &Logger,
  command: &dyn Command,
  ctx: &mut CommandContext<'_>,
) -> Option<ResultStatus> {
  let remote = session.builder_context.try_execute_remote()?;
  let host = HostState {
    variables: session.variables.clone(),
    input_versions: ctx.entry().input_dependency_versions.clone(),
    output_groups: session
      .get_output_objects_groups()
      .iter()
      .map(|group| group.as_ref().clone())
      .collect(),
  };

  let attempt = tokio::select! {
    attempt = remote.try_execute(command, &host) => attempt,
    () = session.cancellation.cancelled() => return Some(ResultStatus::Cancelled),
  };

  match attempt {
    Ok(Some(outcome)) => {
      for message in &outcome.entry.log_messages {
        logger.forward(message);
      }
      if let Err(e) = ctx.merge_entry(outcome.entry) {
        logger.error_with("failed to observe inputs reported by remote worker", &e);
        return Some(ResultStatus::Failed);
      }
      Some(outcome.status)
    }
    Ok(None) => {
      debug!(command = command.type_name(), "remote executor declined command");
      None
    }
    Err(e) => {
      warn!(command = command.type_name(), error = %e, "remote execution failed, running locally");
      logger.warning(format!("remote execution failed, running locally: {e}"));
      None
    }
  }
}

async fn execute_local(
  session: &BuildSession,
  logger: &Logger,
  command: &dyn Command,
  ctx: &mut CommandContext<'_>,
) -> ResultStatus {
  let result = tokio::select! {
    result = command.execute(ctx) => result,
    () = session.cancellation.cancelled() => Err(CommandError::Cancelled),
  };

  match result {
    Ok(status) => status,
    Err(CommandError::Cancelled) => ResultStatus::Cancelled,
    Err(e) => {
      logger.error_with("command failed", &e);
      ResultStatus::Failed
    }
  }
}
