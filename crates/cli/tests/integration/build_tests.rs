//! Build command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

fn object_path(env: &TestEnv, hash: &str) -> std::path::PathBuf {
  env.store_path().join("objects").join(&hash[..2]).join(&hash[2..])
}

#[test]
fn build_bundle_plan() {
  let env = TestEnv::bundle();

  env
    .build(&[])
    .success()
    .stdout(predicate::str::contains("Build complete!"))
    .stdout(predicate::str::contains("Built: 3"));
}

#[test]
fn build_writes_outputs_to_the_store() {
  let env = TestEnv::bundle();

  let report = env.build_json(&[]);
  assert_eq!(report["status"], "Successful");

  let bundle = report["outputs"]["content://bundle"].as_str().unwrap();
  let content = std::fs::read_to_string(object_path(&env, bundle)).unwrap();
  assert_eq!(content, "# header\nbody");
}

#[test]
fn build_is_incremental() {
  let env = TestEnv::bundle();
  env.build(&[]).success();

  env
    .build(&[])
    .success()
    .stdout(predicate::str::contains("Everything up to date"))
    .stdout(predicate::str::contains("Up to date: 3"));
}

#[test]
fn changed_source_rebuilds_its_consumers() {
  let env = TestEnv::bundle();
  env.build(&[]).success();

  env.write_file("body.txt", "a longer body");
  let report = env.build_json(&[]);

  assert_eq!(report["status"], "Successful");
  assert_eq!(report["counts"]["successful"], 2);
  assert_eq!(report["counts"]["up_to_date"], 1);
}

#[test]
fn missing_source_fails_the_build() {
  let env = TestEnv::from_fixture("missing_input.json");

  env
    .build(&[])
    .failure()
    .code(1)
    .stdout(predicate::str::contains("Build failed"))
    .stdout(predicate::str::contains("Skipped: 1"));
}

#[test]
fn failed_report_counts_skipped_dependents() {
  let env = TestEnv::from_fixture("missing_input.json");

  let report = env.build_json(&[]);
  assert_eq!(report["status"], "Failed");
  assert_eq!(report["counts"]["failed"], 1);
  assert_eq!(report["counts"]["prerequisite_failed"], 1);
  assert!(report["outputs"].as_object().unwrap().is_empty());
}

#[test]
fn cyclic_plan_is_rejected() {
  let env = TestEnv::from_fixture("invalid.json");

  env
    .build(&[])
    .failure()
    .stderr(predicate::str::contains("Failed to load plan"));
}

#[test]
fn missing_plan_is_rejected() {
  let env = TestEnv::bundle();

  env
    .forge_cmd()
    .arg("build")
    .arg(env.temp.path().join("nope.json"))
    .assert()
    .failure()
    .stderr(predicate::str::contains("Failed to load plan"));
}

#[test]
fn single_job_builds_everything() {
  let env = TestEnv::bundle();

  let report = env.build_json(&["--jobs", "1"]);
  assert_eq!(report["status"], "Successful");
  assert_eq!(report["counts"]["successful"], 3);
}

#[test]
fn variables_are_accepted() {
  let env = TestEnv::bundle();

  let report = env.build_json(&["--var", "profile=release", "--var", "target=pc"]);
  assert_eq!(report["status"], "Successful");
  assert_eq!(report["counts"]["successful"], 3);
}

#[test]
fn malformed_variables_are_usage_errors() {
  let env = TestEnv::bundle();

  env
    .build(&["--var", "novalue"])
    .failure()
    .code(2)
    .stderr(predicate::str::contains("KEY=VALUE"));
}
