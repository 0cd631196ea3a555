//! Shared helpers and test commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use assetforge_lib::build::{
  BuildStep, Builder, BuilderConfig, Command, CommandContext, CommandError, ListBuildStep, ResultStatus,
};
use assetforge_lib::builtin::ImportFileCommand;
use assetforge_lib::remote::{TransportError, WireFormat};
use assetforge_lib::storage::{FileVersionTracker, ObjectDatabase, ObjectUrl};
use async_trait::async_trait;
use serde::Serialize;
use tempfile::TempDir;

/// A source directory and an object database that outlive single builds.
pub struct TestEnv {
  pub temp: TempDir,
  pub database: ObjectDatabase,
}

impl TestEnv {
  pub fn new() -> Self {
    let temp = TempDir::new().unwrap();
    let database = ObjectDatabase::open(&temp.path().join("store")).unwrap();
    Self { temp, database }
  }

  pub fn path(&self, name: &str) -> PathBuf {
    self.temp.path().join(name)
  }

  pub fn write(&self, name: &str, content: &str) -> PathBuf {
    let path = self.path(name);
    std::fs::write(&path, content).unwrap();
    path
  }

  /// A builder with a fresh file tracker, as a new build process would have.
  pub fn builder(&self) -> Builder {
    self.builder_with(BuilderConfig::default())
  }

  pub fn builder_with(&self, config: BuilderConfig) -> Builder {
    Builder::new(config, self.database.clone(), Arc::new(FileVersionTracker::new()))
  }

  pub fn read(&self, url: &ObjectUrl) -> Option<String> {
    let id = self.database.index.get(&url.path).unwrap()?;
    let bytes = self.database.store.get(&id).unwrap()?;
    Some(String::from_utf8(bytes).unwrap())
  }
}

pub fn import(source: &Path, location: &str) -> Arc<BuildStep> {
  BuildStep::command(ImportFileCommand::new(
    source.to_string_lossy(),
    ObjectUrl::content(location),
  ))
}

pub fn list(steps: impl IntoIterator<Item = Arc<BuildStep>>) -> ListBuildStep {
  let mut list = ListBuildStep::new();
  for step in steps {
    list.add(step);
  }
  list
}

/// Writes `content` to `content://<name>`, counting executions.
#[derive(Debug, Clone, Serialize)]
pub struct Produce {
  pub name: String,
  pub content: String,
  #[serde(skip)]
  pub delay: Duration,
  #[serde(skip)]
  pub runs: Arc<AtomicUsize>,
}

impl Produce {
  pub fn new(name: &str, content: &str) -> Self {
    Self {
      name: name.to_string(),
      content: content.to_string(),
      delay: Duration::ZERO,
      runs: Arc::new(AtomicUsize::new(0)),
    }
  }

  pub fn with_delay(mut self, delay: Duration) -> Self {
    self.delay = delay;
    self
  }

  pub fn runs(&self) -> usize {
    self.runs.load(Ordering::SeqCst)
  }
}

#[async_trait]
impl Command for Produce {
  fn type_name(&self) -> &'static str {
    "test.produce"
  }

  fn title(&self) -> String {
    format!("produce {}", self.name)
  }

  fn encode(&self, format: WireFormat) -> Result<Vec<u8>, TransportError> {
    format.serialize(self)
  }

  async fn execute(&self, ctx: &mut CommandContext<'_>) -> Result<ResultStatus, CommandError> {
    self.runs.fetch_add(1, Ordering::SeqCst);
    if !self.delay.is_zero() {
      tokio::time::sleep(self.delay).await;
    }
    ctx.logger().info(format!("producing {}", self.name));
    ctx.write_output(ObjectUrl::content(self.name.clone()), self.content.as_bytes())?;
    Ok(ResultStatus::Successful)
  }
}

/// Always fails.
#[derive(Debug, Clone, Serialize)]
pub struct Fail {
  pub reason: String,
}

impl Fail {
  pub fn new(reason: &str) -> Self {
    Self {
      reason: reason.to_string(),
    }
  }
}

#[async_trait]
impl Command for Fail {
  fn type_name(&self) -> &'static str {
    "test.fail"
  }

  fn encode(&self, format: WireFormat) -> Result<Vec<u8>, TransportError> {
    format.serialize(self)
  }

  async fn execute(&self, _ctx: &mut CommandContext<'_>) -> Result<ResultStatus, CommandError> {
    Err(CommandError::Failed(self.reason.clone()))
  }
}

/// Runs until the build is cancelled.
#[derive(Debug, Clone, Serialize)]
pub struct WaitForCancel;

#[async_trait]
impl Command for WaitForCancel {
  fn type_name(&self) -> &'static str {
    "test.wait-for-cancel"
  }

  fn encode(&self, format: WireFormat) -> Result<Vec<u8>, TransportError> {
    format.serialize(self)
  }

  async fn execute(&self, ctx: &mut CommandContext<'_>) -> Result<ResultStatus, CommandError> {
    ctx.cancellation().cancelled().await;
    Err(CommandError::Cancelled)
  }
}
