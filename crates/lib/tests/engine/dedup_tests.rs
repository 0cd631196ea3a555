//! Identical commands running at the same time execute once.

use std::sync::Arc;
use std::time::Duration;

use assetforge_lib::build::{BuildStep, Builder, BuilderConfig, ResultStatus};
use assetforge_lib::storage::{FileVersionTracker, ObjectUrl};

use super::common::{Fail, Produce, TestEnv, list};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn identical_commands_execute_once() {
  let env = TestEnv::new();
  let produce = Produce::new("shared", "data").with_delay(Duration::from_millis(100));
  let first = BuildStep::command(produce.clone());
  let second = BuildStep::command(produce.clone());
  let root = BuildStep::list("root", list([first.clone(), second.clone()]));

  let report = env.builder().run(root).await;

  assert_eq!(produce.runs(), 1);
  assert!(first.status().is_successful());
  assert!(second.status().is_successful());
  assert_eq!(first.outputs(), second.outputs());
  assert_eq!(report.status, ResultStatus::Successful);
  assert_eq!(report.counts.total, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn waiters_adopt_failure() {
  let env = TestEnv::new();
  let first = BuildStep::command(Fail::new("broken"));
  let second = BuildStep::command(Fail::new("broken"));
  let root = BuildStep::list("root", list([first.clone(), second.clone()]));

  let report = env.builder().run(root).await;

  assert_eq!(first.status(), ResultStatus::Failed);
  assert_eq!(second.status(), ResultStatus::Failed);
  assert_eq!(report.counts.failed, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn different_parameters_are_not_deduplicated() {
  let env = TestEnv::new();
  let a = Produce::new("a", "data").with_delay(Duration::from_millis(50));
  let b = Produce::new("b", "data").with_delay(Duration::from_millis(50));
  let root = BuildStep::list(
    "root",
    list([BuildStep::command(a.clone()), BuildStep::command(b.clone())]),
  );

  env.builder().run(root).await;

  assert_eq!(a.runs(), 1);
  assert_eq!(b.runs(), 1);
  assert_eq!(env.read(&ObjectUrl::content("a")).as_deref(), Some("data"));
  assert_eq!(env.read(&ObjectUrl::content("b")).as_deref(), Some("data"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn waiting_does_not_hold_a_worker() {
  let env = TestEnv::new();
  let config = BuilderConfig {
    parallelism: 1,
    ..BuilderConfig::default()
  };
  let builder = Builder::new(config, env.database.clone(), Arc::new(FileVersionTracker::new()));

  let shared = Produce::new("shared", "data").with_delay(Duration::from_millis(50));
  let other = Produce::new("other", "data");
  let root = BuildStep::list(
    "root",
    list([
      BuildStep::command(shared.clone()),
      BuildStep::command(shared.clone()),
      BuildStep::command(shared.clone()),
      BuildStep::command(other.clone()),
    ]),
  );

  let report = tokio::time::timeout(Duration::from_secs(10), builder.run(root))
    .await
    .expect("build must not deadlock");

  assert_eq!(report.status, ResultStatus::Successful);
  assert_eq!(shared.runs(), 1);
  assert_eq!(other.runs(), 1);
}
