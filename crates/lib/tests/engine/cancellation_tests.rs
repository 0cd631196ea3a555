//! Cancellation leaves every step terminal and nothing half cached.

use std::time::Duration;

use assetforge_lib::build::{
  BuildStep, CancellationToken, Command, CommandContext, CommandError, ListBuildStep, ResultStatus,
};
use assetforge_lib::remote::{TransportError, WireFormat};
use assetforge_lib::storage::ObjectUrl;
use async_trait::async_trait;
use serde::Serialize;

use super::common::{Produce, TestEnv, WaitForCancel, list};

fn cancel_after(token: &CancellationToken, delay: Duration) {
  let token = token.clone();
  tokio::spawn(async move {
    tokio::time::sleep(delay).await;
    token.cancel();
  });
}

/// Blocks its thread, then reports success without looking at the token.
#[derive(Debug, Clone, Serialize)]
struct Stubborn;

#[async_trait]
impl Command for Stubborn {
  fn type_name(&self) -> &'static str {
    "test.stubborn"
  }

  fn encode(&self, format: WireFormat) -> Result<Vec<u8>, TransportError> {
    format.serialize(self)
  }

  async fn execute(&self, ctx: &mut CommandContext<'_>) -> Result<ResultStatus, CommandError> {
    std::thread::sleep(Duration::from_millis(300));
    ctx.write_output(ObjectUrl::content("stubborn"), b"too late")?;
    Ok(ResultStatus::Successful)
  }
}

#[tokio::test]
async fn running_and_pending_steps_are_cancelled() {
  let env = TestEnv::new();
  let mut steps = ListBuildStep::new();
  let waiting = steps.add(BuildStep::command(WaitForCancel));
  let later = Produce::new("later", "x");
  let later_step = steps.add(BuildStep::command(later.clone()));
  steps.add_dependency(&waiting, &later_step).unwrap();
  let root = BuildStep::list("root", steps);

  let token = CancellationToken::new();
  cancel_after(&token, Duration::from_millis(50));
  let report = env.builder().run_with_cancellation(root.clone(), token).await;

  assert_eq!(report.status, ResultStatus::Cancelled);
  assert_eq!(waiting.status(), ResultStatus::Cancelled);
  assert_eq!(later_step.status(), ResultStatus::Cancelled);
  assert_eq!(later.runs(), 0);
  assert_eq!(report.counts.cancelled, 2);
  assert!(env.builder().result_map().result_hashes().unwrap().is_empty());
}

#[tokio::test]
async fn cancelled_before_start_runs_nothing() {
  let env = TestEnv::new();
  let produce = Produce::new("x", "x");
  let root = BuildStep::list("root", list([BuildStep::command(produce.clone())]));

  let token = CancellationToken::new();
  token.cancel();
  let report = env.builder().run_with_cancellation(root, token).await;

  assert_eq!(report.status, ResultStatus::Cancelled);
  assert_eq!(produce.runs(), 0);
}

#[tokio::test]
async fn slow_commands_unwind_promptly() {
  let env = TestEnv::new();
  let slow = Produce::new("slow", "x").with_delay(Duration::from_secs(30));
  let step = BuildStep::command(slow.clone());

  let token = CancellationToken::new();
  cancel_after(&token, Duration::from_millis(50));
  let report = tokio::time::timeout(
    Duration::from_secs(5),
    env.builder().run_with_cancellation(step.clone(), token),
  )
  .await
  .expect("cancellation must interrupt the command");

  assert_eq!(report.status, ResultStatus::Cancelled);
  assert_eq!(step.status(), ResultStatus::Cancelled);
  assert_eq!(env.read(&ObjectUrl::content("slow")), None);
}

#[tokio::test]
async fn cancellation_is_not_failure() {
  let env = TestEnv::new();
  let token = CancellationToken::new();
  cancel_after(&token, Duration::from_millis(20));
  let report = env
    .builder()
    .run_with_cancellation(BuildStep::command(WaitForCancel), token)
    .await;

  assert_eq!(report.counts.failed, 0);
  assert_eq!(report.counts.cancelled, 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn success_after_cancellation_is_discarded() {
  let env = TestEnv::new();
  let step = BuildStep::command(Stubborn);
  let token = CancellationToken::new();
  cancel_after(&token, Duration::from_millis(50));

  let report = env.builder().run_with_cancellation(step.clone(), token).await;

  assert_eq!(report.status, ResultStatus::Cancelled);
  assert_eq!(step.status(), ResultStatus::Cancelled);
  assert_eq!(report.counts.cancelled, 1);
  assert_eq!(report.counts.successful, 0);
  assert_eq!(env.read(&ObjectUrl::content("stubborn")), None);
  assert!(env.builder().result_map().result_hashes().unwrap().is_empty());
}
