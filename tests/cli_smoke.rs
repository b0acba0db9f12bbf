//! Behavioural smoke tests for the CLI entrypoints.

use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;

#[test]
fn help_lists_subcommands() {
    let mut cmd = cargo_bin_cmd!("prbranch");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("deploy").and(predicate::str::contains("terminate")));
}

#[test]
fn terminate_without_ids_is_rejected_before_any_provider_call() {
    let mut cmd = cargo_bin_cmd!("prbranch");
    cmd.arg("terminate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("<ID>"));
}

#[test]
fn deploy_requires_an_image_tag() {
    let mut cmd = cargo_bin_cmd!("prbranch");
    cmd.args(["deploy", "pr-42", "--artifact", "image.tar"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("--tag"));
}

#[test]
fn sweep_help_describes_the_collector() {
    let mut cmd = cargo_bin_cmd!("prbranch-sweep");
    cmd.arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("closed or merged"));
}
