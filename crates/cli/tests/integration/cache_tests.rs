//! Cache command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

fn result_hashes(env: &TestEnv) -> Vec<String> {
  let output = env
    .forge_cmd()
    .args(["cache", "list", "--output", "json"])
    .output()
    .unwrap();
  assert!(output.status.success());
  let list: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  list
    .as_array()
    .unwrap()
    .iter()
    .map(|summary| summary["hash"].as_str().unwrap().to_string())
    .collect()
}

#[test]
fn empty_store_has_no_results() {
  let env = TestEnv::bundle();

  env
    .forge_cmd()
    .args(["cache", "list"])
    .assert()
    .success()
    .stdout(predicate::str::contains("No command results recorded"));
}

#[test]
fn build_records_one_result_per_command() {
  let env = TestEnv::bundle();
  env.build(&[]).success();

  assert_eq!(result_hashes(&env).len(), 3);
  env
    .forge_cmd()
    .args(["cache", "list"])
    .assert()
    .success()
    .stdout(predicate::str::contains("3 command result(s)"));
}

#[test]
fn failed_commands_are_not_recorded() {
  let env = TestEnv::from_fixture("missing_input.json");
  env.build(&[]).failure();

  assert!(result_hashes(&env).is_empty());
}

#[test]
fn show_prints_inputs_and_outputs() {
  let env = TestEnv::bundle();
  env.build(&[]).success();

  let mut shown = String::new();
  for hash in result_hashes(&env) {
    let output = env.forge_cmd().args(["cache", "show", &hash]).output().unwrap();
    assert!(output.status.success());
    shown.push_str(&String::from_utf8_lossy(&output.stdout));
  }

  assert!(shown.contains("content://bundle"));
  assert!(shown.contains("header.txt"));
  assert!(shown.contains("Inputs:"));
}

#[test]
fn show_json_is_the_result_entry() {
  let env = TestEnv::bundle();
  env.build(&[]).success();

  let hash = result_hashes(&env).remove(0);
  let output = env
    .forge_cmd()
    .args(["cache", "show", &hash, "--output", "json"])
    .output()
    .unwrap();
  let entry: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();

  assert_eq!(entry["output_objects"].as_object().unwrap().len(), 1);
  assert!(entry["input_dependency_versions"].is_object());
}

#[test]
fn show_rejects_unknown_hashes() {
  let env = TestEnv::bundle();

  env
    .forge_cmd()
    .args(["cache", "show", "00000000000000000000000000000000"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("No result recorded"));

  env
    .forge_cmd()
    .args(["cache", "show", "not-a-hash"])
    .assert()
    .failure()
    .stderr(predicate::str::contains("invalid object id"));
}

#[test]
fn stats_count_stored_objects() {
  let env = TestEnv::bundle();
  env.build(&[]).success();

  let output = env
    .forge_cmd()
    .args(["cache", "stats", "--output", "json"])
    .output()
    .unwrap();
  let stats: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();

  // Three outputs plus three result entries.
  assert_eq!(stats["objects"], 6);
}
