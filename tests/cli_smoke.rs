//! Behavioural smoke tests for the CLI entrypoint.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::str::contains;

#[test]
fn cli_without_arguments_shows_usage_and_fails() {
    let mut cmd = cargo_bin_cmd!("sysup");
    cmd.assert().failure().stderr(contains("Usage"));
}

#[test]
fn cli_lists_the_lifecycle_actions_in_help() {
    let mut cmd = cargo_bin_cmd!("sysup");
    cmd.arg("--help");
    let assert = cmd.assert().success();
    let output = assert.get_output().stdout.clone();
    let rendered = String::from_utf8(output).expect("utf8 help");
    for action in ["up", "destroy", "ssh", "report", "save_ami"] {
        assert!(rendered.contains(action), "help missing `{action}`");
    }
}

#[test]
fn missing_document_is_a_fatal_configuration_error() {
    let mut cmd = cargo_bin_cmd!("sysup");
    cmd.args(["report", "no-such-system-acceptance-check"]);
    cmd.assert()
        .failure()
        .code(1)
        .stderr(contains("failed to read document"));
}
