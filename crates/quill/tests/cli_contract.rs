//! CLI command contract tests.
//!
//! Runs the `quill` binary against a temp settings directory (via
//! `QUILL_HOME`) with no service manager interaction assumed: every scenario
//! here exercises the stopped state, which is the only one a test
//! environment can rely on.
//!
//! Contract guarantees tested:
//! - First run bootstraps default settings without overwriting later edits
//! - set/get round-trips for address and database
//! - Credentials never appear unredacted in output
//! - `stop` against a stopped service succeeds

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn quill(home: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("quill").expect("binary built");
    cmd.env("QUILL_HOME", home.path());
    cmd
}

#[test]
fn first_run_bootstraps_default_address() {
    let home = TempDir::new().expect("temp dir");

    quill(&home)
        .arg("get-addr")
        .assert()
        .success()
        .stdout(predicate::str::contains(":3030"));

    assert!(home.path().join("quill.json").exists());
}

#[test]
fn set_addr_round_trips_and_survives_bootstrap() {
    let home = TempDir::new().expect("temp dir");

    quill(&home)
        .args(["set-addr", "127.0.0.1:4545"])
        .assert()
        .success()
        .stdout(predicate::str::contains("saved"));

    // The second invocation bootstraps again; the edit must survive.
    quill(&home)
        .arg("get-addr")
        .assert()
        .success()
        .stdout(predicate::str::contains("127.0.0.1:4545"));
}

#[test]
fn get_db_redacts_credentials() {
    let home = TempDir::new().expect("temp dir");

    quill(&home)
        .args(["set-db", "alice:hunter2@db.internal:5432"])
        .assert()
        .success();

    quill(&home)
        .arg("get-db")
        .assert()
        .success()
        .stdout(predicate::str::contains("alice@db.internal:5432"))
        .stdout(predicate::str::contains("hunter2").not());
}

#[test]
fn get_db_reports_undefined_when_unset() {
    let home = TempDir::new().expect("temp dir");

    quill(&home)
        .arg("get-db")
        .assert()
        .success()
        .stdout(predicate::str::contains("undefined"));
}

#[test]
fn corrupt_session_file_aborts_instead_of_hiding_drift() {
    let home = TempDir::new().expect("temp dir");

    quill(&home)
        .args(["set-addr", "127.0.0.1:4545"])
        .assert()
        .success();

    // A mangled session.json is not the same as "no instance launched yet";
    // readers must refuse rather than silently fall back to stored values.
    std::fs::write(home.path().join("session.json"), "{not json").expect("write corrupt file");

    quill(&home)
        .arg("get-addr")
        .assert()
        .failure()
        .stderr(predicate::str::contains("corrupt settings file"));

    quill(&home)
        .arg("stop")
        .assert()
        .failure()
        .stderr(predicate::str::contains("corrupt settings file"));
}

#[test]
fn state_reports_stopped_service() {
    let home = TempDir::new().expect("temp dir");

    quill(&home)
        .arg("state")
        .assert()
        .success()
        .stdout(predicate::str::contains("quill version"))
        .stdout(predicate::str::contains("stopped"))
        .stdout(predicate::str::contains("not answering"));
}

#[test]
fn stop_against_stopped_service_succeeds() {
    let home = TempDir::new().expect("temp dir");

    // Point the control channel at a loopback port nothing listens on.
    quill(&home)
        .args(["set-addr", "127.0.0.1:1"])
        .assert()
        .success();

    quill(&home)
        .arg("stop")
        .assert()
        .success()
        .stdout(predicate::str::contains("Service stopped"));
}

#[test]
fn unknown_subcommand_fails_with_usage() {
    let home = TempDir::new().expect("temp dir");

    quill(&home)
        .arg("frobnicate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Usage").or(predicate::str::contains("unrecognized")));
}
