//! Builds that run commands in `forge worker` processes.

use super::common::TestEnv;

#[test]
fn remote_build_matches_local_build() {
  let remote = TestEnv::bundle();
  let local = TestEnv::bundle();

  let remote_report = remote.build_json(&["--remote"]);
  let local_report = local.build_json(&[]);

  assert_eq!(remote_report["status"], "Successful");
  assert_eq!(remote_report["outputs"], local_report["outputs"]);
}

#[test]
fn remote_build_with_json_wire_format() {
  let env = TestEnv::bundle();

  let report = env.build_json(&["--remote", "--format", "json"]);
  assert_eq!(report["status"], "Successful");
  assert_eq!(report["counts"]["successful"], 3);
}

#[test]
fn remote_results_are_cached_locally() {
  let env = TestEnv::bundle();
  env.build(&["--remote"]).success();

  let report = env.build_json(&[]);
  assert_eq!(report["status"], "NotTriggeredWasSuccessful");
  assert_eq!(report["counts"]["up_to_date"], 3);
}

#[test]
fn remote_failures_fail_the_build() {
  let env = TestEnv::from_fixture("missing_input.json");

  let report = env.build_json(&["--remote"]);
  assert_eq!(report["status"], "Failed");
  assert_eq!(report["counts"]["failed"], 1);
}
