//! Shared test helpers for CLI integration tests.

use std::path::PathBuf;

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use tempfile::TempDir;

/// Get path to a fixture file.
pub fn fixture_path(name: &str) -> PathBuf {
  PathBuf::from(env!("CARGO_MANIFEST_DIR"))
    .join("tests")
    .join("fixtures")
    .join(name)
}

/// Read fixture content.
pub fn fixture_content(name: &str) -> String {
  std::fs::read_to_string(fixture_path(name)).unwrap_or_else(|e| panic!("Failed to load fixture {}: {}", name, e))
}

/// Isolated test environment.
///
/// Each test gets its own temporary directory holding the plan, its source
/// files and the object store.
pub struct TestEnv {
  pub temp: TempDir,
  pub plan_path: PathBuf,
}

impl TestEnv {
  /// Copy a fixture plan to `plan.json` in a fresh temporary directory.
  pub fn from_fixture(name: &str) -> Self {
    let temp = TempDir::new().unwrap();
    let plan_path = temp.path().join("plan.json");
    std::fs::write(&plan_path, fixture_content(name)).unwrap();
    Self { temp, plan_path }
  }

  /// The `bundle.json` fixture with both of its sources present.
  pub fn bundle() -> Self {
    let env = Self::from_fixture("bundle.json");
    env.write_file("header.txt", "# header");
    env.write_file("body.txt", "body");
    env
  }

  /// Write a file relative to the temp directory.
  pub fn write_file(&self, relative_path: &str, content: &str) {
    let path = self.temp.path().join(relative_path);
    if let Some(parent) = path.parent() {
      std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(&path, content).unwrap();
  }

  pub fn store_path(&self) -> PathBuf {
    self.temp.path().join("store")
  }

  /// A forge command pointed at this environment's store.
  pub fn forge_cmd(&self) -> Command {
    let mut cmd = cargo_bin_cmd!("forge");
    cmd.arg("--store").arg(self.store_path()).env_remove("RUST_LOG");
    cmd
  }

  /// `forge build <plan> <args>`.
  pub fn build(&self, args: &[&str]) -> assert_cmd::assert::Assert {
    self.forge_cmd().arg("build").arg(&self.plan_path).args(args).assert()
  }

  /// Run `forge build --output json` and parse the report.
  pub fn build_json(&self, args: &[&str]) -> serde_json::Value {
    let output = self
      .forge_cmd()
      .arg("build")
      .arg(&self.plan_path)
      .args(["--output", "json"])
      .args(args)
      .output()
      .unwrap();
    serde_json::from_slice(&output.stdout)
      .unwrap_or_else(|e| panic!("invalid report: {e}\n{}", String::from_utf8_lossy(&output.stdout)))
  }
}
