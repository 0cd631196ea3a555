//! Result caching and invalidation across builds.

use std::sync::Arc;

use assetforge_lib::build::{BuildStep, Builder, BuilderConfig, ListBuildStep, ResultStatus};
use assetforge_lib::builtin::ConcatCommand;
use assetforge_lib::diagnostics::LogMessageType;
use assetforge_lib::storage::{FileVersionTracker, MemoryStore, ObjectDatabase, ObjectUrl};

use super::common::{Produce, TestEnv, import};

fn concat(sources: &[&str], location: &str) -> Arc<BuildStep> {
  BuildStep::command(ConcatCommand::new(
    sources.iter().map(|s| ObjectUrl::content(*s)).collect(),
    ObjectUrl::content(location),
  ))
}

/// import a.txt -> content://a, import b.txt -> content://b, concat both -> content://ab
fn pipeline(env: &TestEnv) -> Arc<BuildStep> {
  let mut steps = ListBuildStep::new();
  let a = steps.add(import(&env.path("a.txt"), "a"));
  let b = steps.add(import(&env.path("b.txt"), "b"));
  let ab = steps.add(concat(&["a", "b"], "ab"));
  steps.add_dependency(&a, &ab).unwrap();
  steps.add_dependency(&b, &ab).unwrap();
  BuildStep::list("pipeline", steps)
}

#[tokio::test]
async fn second_build_is_up_to_date() {
  let env = TestEnv::new();
  env.write("a.txt", "alpha");
  env.write("b.txt", "beta");

  let first = env.builder().run(pipeline(&env)).await;
  assert_eq!(first.status, ResultStatus::Successful);
  assert_eq!(first.counts.successful, 3);
  assert_eq!(env.read(&ObjectUrl::content("ab")).as_deref(), Some("alphabeta"));

  let second = env.builder().run(pipeline(&env)).await;
  assert_eq!(second.status, ResultStatus::NotTriggeredWasSuccessful);
  assert_eq!(second.counts.up_to_date, 3);
  assert_eq!(second.counts.successful, 0);
  assert_eq!(second.outputs, first.outputs);
}

#[tokio::test]
async fn changed_input_rebuilds_its_consumers_only() {
  let env = TestEnv::new();
  env.write("a.txt", "alpha");
  env.write("b.txt", "beta");
  env.builder().run(pipeline(&env)).await;

  env.write("a.txt", "ALPHA!");
  let report = env.builder().run(pipeline(&env)).await;

  assert_eq!(report.status, ResultStatus::Successful);
  assert_eq!(report.counts.successful, 2, "import a and the concat rebuild");
  assert_eq!(report.counts.up_to_date, 1, "import b is reused");
  assert_eq!(env.read(&ObjectUrl::content("ab")).as_deref(), Some("ALPHA!beta"));
}

#[tokio::test]
async fn cached_logs_are_replayed() {
  let env = TestEnv::new();
  let produce = Produce::new("x", "payload");

  let first = BuildStep::command(produce.clone());
  env.builder().run(first.clone()).await;
  assert_eq!(produce.runs(), 1);

  let second = BuildStep::command(produce.clone());
  let report = env.builder().run(second.clone()).await;

  assert_eq!(produce.runs(), 1);
  assert_eq!(second.status(), ResultStatus::NotTriggeredWasSuccessful);
  assert!(second.log_messages().iter().any(|m| m.text == "producing x"));
  assert!(
    report
      .log
      .iter()
      .any(|m| m.text == "producing x" && m.kind == LogMessageType::Info)
  );
}

#[tokio::test]
async fn missing_output_objects_force_a_rebuild() {
  let env = TestEnv::new();
  let produce = Produce::new("x", "payload");
  env.builder().run(BuildStep::command(produce.clone())).await;

  // Same index, empty object store.
  let database = ObjectDatabase::new(Arc::new(MemoryStore::new()), env.database.index.clone());
  let builder = Builder::new(BuilderConfig::default(), database, Arc::new(FileVersionTracker::new()));
  let step = BuildStep::command(produce.clone());
  builder.run(step.clone()).await;

  assert_eq!(step.status(), ResultStatus::Successful);
  assert_eq!(produce.runs(), 2);
}

#[tokio::test]
async fn changed_parameters_miss_the_cache() {
  let env = TestEnv::new();
  env.builder().run(BuildStep::command(Produce::new("x", "one"))).await;

  let step = BuildStep::command(Produce::new("x", "two"));
  env.builder().run(step.clone()).await;

  assert_eq!(step.status(), ResultStatus::Successful);
  assert_eq!(env.read(&ObjectUrl::content("x")).as_deref(), Some("two"));
}

#[tokio::test]
async fn missing_input_fails_without_caching() {
  let env = TestEnv::new();
  let step = import(&env.path("absent.txt"), "absent");

  let report = env.builder().run(step.clone()).await;

  assert_eq!(report.status, ResultStatus::Failed);
  assert!(step.log_messages().iter().any(|m| m.kind == LogMessageType::Error));
  assert!(env.builder().result_map().result_hashes().unwrap().is_empty());
}

#[tokio::test]
async fn results_are_recorded_by_command_hash() {
  let env = TestEnv::new();
  let step = BuildStep::command(Produce::new("x", "payload"));
  env.builder().run(step.clone()).await;

  let hash = step.command_hash().unwrap();
  let results = env.builder().result_map();
  assert_eq!(results.result_hashes().unwrap(), vec![hash]);

  let entry = results.load_result(&hash).unwrap().unwrap();
  assert_eq!(entry.output_objects.len(), 1);
  assert!(entry.log_messages.iter().any(|m| m.text == "producing x"));
}
