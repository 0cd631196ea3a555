//! Failure propagation through dependencies.

use std::sync::Arc;
use std::time::Duration;

use assetforge_lib::build::{BuildStep, BuilderConfig, CancellationToken, ListBuildStep, ResultStatus};
use assetforge_lib::diagnostics::LogMessageType;

use super::common::{Fail, Produce, TestEnv};

#[tokio::test]
async fn dependents_of_a_failure_are_not_triggered() {
  let env = TestEnv::new();
  let mut steps = ListBuildStep::new();
  let broken = steps.add(BuildStep::command(Fail::new("compiler crashed")));
  let dependent = Produce::new("dependent", "x");
  let dependent_step = steps.add(BuildStep::command(dependent.clone()));
  let transitive = steps.add(BuildStep::command(Produce::new("transitive", "y")));
  let sibling = steps.add(BuildStep::command(Produce::new("sibling", "z")));
  steps.add_dependency(&broken, &dependent_step).unwrap();
  steps.add_dependency(&dependent_step, &transitive).unwrap();

  let report = env.builder().run(BuildStep::list("root", steps)).await;

  assert_eq!(broken.status(), ResultStatus::Failed);
  assert_eq!(dependent_step.status(), ResultStatus::NotTriggeredPrerequisiteFailed);
  assert_eq!(transitive.status(), ResultStatus::NotTriggeredPrerequisiteFailed);
  assert_eq!(sibling.status(), ResultStatus::Successful);
  assert_eq!(dependent.runs(), 0);

  assert_eq!(report.status, ResultStatus::Failed);
  assert_eq!(report.counts.failed, 1);
  assert_eq!(report.counts.prerequisite_failed, 2);
  assert_eq!(report.counts.successful, 1);
  assert_eq!(report.counts.total, 4);
}

#[tokio::test]
async fn failure_is_logged_with_its_cause() {
  let env = TestEnv::new();
  let step = BuildStep::command(Fail::new("compiler crashed"));
  let report = env.builder().run(step.clone()).await;

  let error = step
    .log_messages()
    .into_iter()
    .find(|m| m.kind == LogMessageType::Error)
    .expect("an error message");
  let exception = error.exception.expect("exception info");
  assert_eq!(exception.message, "compiler crashed");
  assert!(report.log.iter().any(|m| m.kind == LogMessageType::Error));
}

#[tokio::test]
async fn nested_lists_skip_every_step_below_them() {
  let env = TestEnv::new();
  let mut inner = ListBuildStep::new();
  let inner_a = inner.add(BuildStep::command(Produce::new("a", "a")));
  let inner_b = inner.add(BuildStep::command(Produce::new("b", "b")));
  let inner_step = BuildStep::list("inner", inner);

  let mut outer = ListBuildStep::new();
  let broken = outer.add(BuildStep::command(Fail::new("nope")));
  outer.add(inner_step.clone());
  outer.add_dependency(&broken, &inner_step).unwrap();

  let report = env.builder().run(BuildStep::list("outer", outer)).await;

  assert_eq!(inner_step.status(), ResultStatus::NotTriggeredPrerequisiteFailed);
  assert_eq!(inner_a.status(), ResultStatus::NotTriggeredPrerequisiteFailed);
  assert_eq!(inner_b.status(), ResultStatus::NotTriggeredPrerequisiteFailed);
  assert_eq!(report.counts.prerequisite_failed, 2);
  assert_eq!(report.counts.total, 3);
}

#[tokio::test]
async fn invalid_parameters_fail_without_executing() {
  use assetforge_lib::builtin::ConcatCommand;
  use assetforge_lib::storage::ObjectUrl;

  let env = TestEnv::new();
  let step = BuildStep::command(ConcatCommand::new(Vec::new(), ObjectUrl::content("out")));
  let report = env.builder().run(step.clone()).await;

  assert_eq!(report.status, ResultStatus::Failed);
  assert!(step.command_hash().is_none());
  assert!(step.log_messages().iter().any(|m| m.text == "invalid command parameters"));
}

#[tokio::test]
async fn every_step_ends_terminal() {
  let env = TestEnv::new();
  let mut steps = ListBuildStep::new();
  let a = steps.add(BuildStep::command(Fail::new("a")));
  let b = steps.add(BuildStep::command(Produce::new("b", "b")));
  let c = steps.add(BuildStep::command(Produce::new("c", "c")));
  steps.add_dependency(&a, &c).unwrap();
  steps.add_dependency(&b, &c).unwrap();
  let root = BuildStep::list("root", steps);

  env.builder().run(root.clone()).await;

  for step in [&root, &a, &b, &c] {
    assert!(step.status().is_terminal(), "{step:?} is not terminal");
  }
}

#[tokio::test]
async fn dependents_start_without_waiting_for_unrelated_steps() {
  let env = TestEnv::new();
  let mut steps = ListBuildStep::new();
  let fast = steps.add(BuildStep::command(Produce::new("fast", "a")));
  let slow = steps.add(BuildStep::command(Produce::new("slow", "c").with_delay(Duration::from_secs(30))));
  let dependent = steps.add(BuildStep::command(Produce::new("dependent", "b")));
  steps.add_dependency(&fast, &dependent).unwrap();
  let root = BuildStep::list("root", steps);

  let builder = Arc::new(env.builder_with(BuilderConfig {
    parallelism: 4,
    ..BuilderConfig::default()
  }));
  let token = CancellationToken::new();
  let build = tokio::spawn({
    let (builder, root, token) = (builder.clone(), root.clone(), token.clone());
    async move { builder.run_with_cancellation(root, token).await }
  });

  let status = tokio::time::timeout(Duration::from_secs(5), dependent.wait_completed())
    .await
    .expect("dependent should finish while the slow step still runs");
  assert_eq!(status, ResultStatus::Successful);
  assert!(!slow.status().is_terminal());

  token.cancel();
  let report = build.await.unwrap();
  assert_eq!(slow.status(), ResultStatus::Cancelled);
  assert_eq!(report.counts.successful, 2);
}
