//! Remote execution through the worker protocol, and local fallback.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use assetforge_lib::build::{BuildStep, Builder, BuilderConfig, Command, ResultStatus};
use assetforge_lib::diagnostics::LogMessageType;
use assetforge_lib::remote::{
  CommandRegistry, Envelope, EnvelopeKind, HostState, RemoteError, RemoteExecutor, RemoteOutcome, RemoteRequest,
  RemoteResponse, WireFormat, run_worker,
};
use assetforge_lib::storage::{FileVersionTracker, MemoryVersionTracker, ObjectDatabase, ObjectUrl};
use async_trait::async_trait;

use super::common::{Produce, TestEnv, import};

/// Serves each request with an in-process worker over an in-memory pipe.
struct DuplexExecutor {
  registry: CommandRegistry,
  database: ObjectDatabase,
  format: WireFormat,
  calls: AtomicUsize,
}

impl DuplexExecutor {
  fn new(database: ObjectDatabase, format: WireFormat) -> Arc<Self> {
    Arc::new(Self {
      registry: CommandRegistry::with_builtins(),
      database,
      format,
      calls: AtomicUsize::new(0),
    })
  }

  fn calls(&self) -> usize {
    self.calls.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl RemoteExecutor for DuplexExecutor {
  async fn try_execute(&self, command: &dyn Command, host: &HostState) -> Result<Option<RemoteOutcome>, RemoteError> {
    if !self.registry.contains(command.type_name()) {
      return Ok(None);
    }
    self.calls.fetch_add(1, Ordering::SeqCst);

    let (mut engine, mut worker) = tokio::io::duplex(64 * 1024);
    let registry = self.registry.clone();
    let database = self.database.clone();
    let format = self.format;
    let serve = tokio::spawn(async move {
      let (mut reader, mut writer) = tokio::io::split(&mut worker);
      run_worker(&registry, database, format, &mut reader, &mut writer).await
    });

    let request = RemoteRequest {
      command_type: command.type_name().to_string(),
      parameters: command.encode(format)?,
      host: host.clone(),
    };
    Envelope::wrap(EnvelopeKind::Request, format, &request)?
      .write_to(&mut engine)
      .await?;
    let response: RemoteResponse = Envelope::read_from(&mut engine)
      .await?
      .open(EnvelopeKind::Response, format)?;
    let _ = serve.await;

    match response {
      RemoteResponse::Completed(outcome) => Ok(Some(outcome)),
      RemoteResponse::Rejected(_) => Ok(None),
    }
  }
}

struct BrokenExecutor;

#[async_trait]
impl RemoteExecutor for BrokenExecutor {
  async fn try_execute(&self, _command: &dyn Command, _host: &HostState) -> Result<Option<RemoteOutcome>, RemoteError> {
    Err(RemoteError::Timeout(Duration::from_secs(1)))
  }
}

struct DecliningExecutor;

#[async_trait]
impl RemoteExecutor for DecliningExecutor {
  async fn try_execute(&self, _command: &dyn Command, _host: &HostState) -> Result<Option<RemoteOutcome>, RemoteError> {
    Ok(None)
  }
}

fn remote_builder(env: &TestEnv, remote: Arc<dyn RemoteExecutor>) -> Builder {
  Builder::new(
    BuilderConfig::default(),
    env.database.clone(),
    Arc::new(FileVersionTracker::new()),
  )
  .with_remote(remote)
}

#[tokio::test]
async fn remote_results_are_published_and_cached() {
  for format in [WireFormat::Binary, WireFormat::Json] {
    let env = TestEnv::new();
    let source = env.write("grass.png", "green pixels");
    let remote = DuplexExecutor::new(env.database.clone(), format);

    let step = import(&source, "grass");
    let report = remote_builder(&env, remote.clone()).run(step.clone()).await;

    assert_eq!(report.status, ResultStatus::Successful, "{format}");
    assert_eq!(remote.calls(), 1);
    assert_eq!(env.read(&ObjectUrl::content("grass")).as_deref(), Some("green pixels"));
    assert!(step.log_messages().iter().any(|m| m.text.starts_with("imported 12 bytes")));

    let again = import(&source, "grass");
    let report = remote_builder(&env, remote.clone()).run(again).await;
    assert_eq!(report.status, ResultStatus::NotTriggeredWasSuccessful);
    assert_eq!(remote.calls(), 1, "cache hits never reach the worker");
  }
}

#[tokio::test]
async fn unknown_command_types_run_locally() {
  let env = TestEnv::new();
  let remote = DuplexExecutor::new(env.database.clone(), WireFormat::Binary);
  let produce = Produce::new("local", "x");

  let report = remote_builder(&env, remote.clone())
    .run(BuildStep::command(produce.clone()))
    .await;

  assert_eq!(report.status, ResultStatus::Successful);
  assert_eq!(remote.calls(), 0);
  assert_eq!(produce.runs(), 1);
}

#[tokio::test]
async fn broken_remote_falls_back_to_local() {
  let env = TestEnv::new();
  let produce = Produce::new("fallback", "x");
  let step = BuildStep::command(produce.clone());

  let report = remote_builder(&env, Arc::new(BrokenExecutor)).run(step.clone()).await;

  assert_eq!(report.status, ResultStatus::Successful);
  assert_eq!(produce.runs(), 1);
  assert!(
    step
      .log_messages()
      .iter()
      .any(|m| m.kind == LogMessageType::Warning && m.text.starts_with("remote execution failed"))
  );
}

#[tokio::test]
async fn declined_commands_run_locally() {
  let env = TestEnv::new();
  let produce = Produce::new("declined", "x");

  let report = remote_builder(&env, Arc::new(DecliningExecutor))
    .run(BuildStep::command(produce.clone()))
    .await;

  assert_eq!(report.status, ResultStatus::Successful);
  assert_eq!(produce.runs(), 1);
}

#[tokio::test]
async fn remote_failures_are_failures() {
  let env = TestEnv::new();
  let remote = DuplexExecutor::new(env.database.clone(), WireFormat::Binary);
  let step = import(&env.path("missing.png"), "missing");

  let report = remote_builder(&env, remote.clone()).run(step.clone()).await;

  assert_eq!(remote.calls(), 1);
  assert_eq!(report.status, ResultStatus::Failed);
  assert!(step.log_messages().iter().any(|m| m.kind == LogMessageType::Error));
}

#[tokio::test]
async fn host_input_versions_survive_remote_execution() {
  let env = TestEnv::new();
  let source = env.write("stone.png", "grey pixels");
  // The engine's view of the file differs from a hash of its bytes.
  let tracker = Arc::new(MemoryVersionTracker::new());
  tracker.set_content(source.clone(), b"version known to the editor");
  let remote = DuplexExecutor::new(env.database.clone(), WireFormat::Json);
  let builder = || {
    Builder::new(BuilderConfig::default(), env.database.clone(), tracker.clone()).with_remote(remote.clone())
  };

  let first = builder().run(import(&source, "stone")).await;
  assert_eq!(first.status, ResultStatus::Successful);
  assert_eq!(remote.calls(), 1);

  let second = builder().run(import(&source, "stone")).await;
  assert_eq!(second.status, ResultStatus::NotTriggeredWasSuccessful);
  assert_eq!(remote.calls(), 1);
}
