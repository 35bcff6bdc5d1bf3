//! End-to-end runs of the binary against a temporary state directory

use assert_cmd::Command;
use serde_json::Value;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn cli(state_dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("resumable-transfer").unwrap();
    cmd.env_remove("TRANSFER_BACKEND")
        .env_remove("TRANSFER_REDIS_URL")
        .env("RUST_LOG", "off")
        .arg("--state-dir")
        .arg(state_dir);
    cmd
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).expect("stdout is one JSON document")
}

fn seed_input(dir: &TempDir) -> std::path::PathBuf {
    let input = dir.path().join("people.csv");
    fs::write(&input, "id,name,city\n1,Ann,Oslo\n2,Bo,\n3,Cy,Rome\n").unwrap();
    input
}

#[test]
fn test_transfer_reports_json_summary() {
    let dir = TempDir::new().unwrap();
    let state = dir.path().join("state");
    let input = seed_input(&dir);
    let output = dir.path().join("out").join("people.jsonl");

    let assert = cli(&state)
        .args(["--output-format", "json", "transfer", "--from", "csv", "--to", "jsonl"])
        .arg("--input")
        .arg(&input)
        .arg("--output")
        .arg(&output)
        .args(["--operation-id", "people", "--batch-size", "2"])
        .assert()
        .success();

    let report = stdout_json(assert.get_output());
    assert_eq!(report["operationId"], "people");
    assert_eq!(report["status"], "completed");
    assert_eq!(report["paused"], false);
    assert_eq!(report["recordsWritten"], 3);
    assert_eq!(report["recordsConsumed"], 3);

    let written = fs::read_to_string(&output).unwrap();
    assert_eq!(written.lines().count(), 3);
}

#[test]
fn test_status_and_inspect_after_transfer() {
    let dir = TempDir::new().unwrap();
    let state = dir.path().join("state");
    let input = seed_input(&dir);
    let output = dir.path().join("people.csv.out");

    cli(&state)
        .args(["transfer", "--from", "csv", "--to", "csv", "--require", "city"])
        .arg("--input")
        .arg(&input)
        .arg("--output")
        .arg(&output)
        .args(["--operation-id", "with-city"])
        .assert()
        .success();

    let status = cli(&state)
        .args(["status", "--output-format", "json"])
        .assert()
        .success();
    let listed = stdout_json(status.get_output());
    let listed = listed.as_array().unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["operationId"], "with-city");
    assert_eq!(listed[0]["processedRecords"], 2);
    assert_eq!(listed[0]["failedRecords"], 1);

    let filtered = cli(&state)
        .args(["status", "--status", "running", "--output-format", "json"])
        .assert()
        .success();
    assert_eq!(stdout_json(filtered.get_output()), Value::Array(vec![]));

    let inspect = cli(&state)
        .args(["--output-format", "json", "inspect", "with-city"])
        .assert()
        .success();
    let report = stdout_json(inspect.get_output());
    assert_eq!(report["progress"]["status"], "completed");
    assert_eq!(report["checkpoint"]["state"]["recordsConsumed"], 3);
}

#[test]
fn test_rerun_of_completed_transfer_fails_with_hint() {
    let dir = TempDir::new().unwrap();
    let state = dir.path().join("state");
    let input = seed_input(&dir);
    let output = dir.path().join("people.jsonl");

    let run = |extra: &[&str]| {
        let mut cmd = cli(&state);
        cmd.args(["transfer", "--from", "csv", "--to", "jsonl"])
            .arg("--input")
            .arg(&input)
            .arg("--output")
            .arg(&output)
            .args(extra);
        cmd
    };

    run(&[]).assert().success();

    let failed = run(&[]).assert().failure();
    let stderr = String::from_utf8_lossy(&failed.get_output().stderr).to_string();
    assert!(stderr.contains("--restart"), "stderr was: {stderr}");

    run(&["--restart"]).assert().success();
    assert_eq!(fs::read_to_string(&output).unwrap().lines().count(), 3);
}

#[test]
fn test_inspect_unknown_operation_fails() {
    let dir = TempDir::new().unwrap();

    cli(&dir.path().join("state"))
        .args(["inspect", "does-not-exist"])
        .assert()
        .failure();
}

#[test]
fn test_same_input_and_output_rejected() {
    let dir = TempDir::new().unwrap();
    let input = seed_input(&dir);

    cli(&dir.path().join("state"))
        .args(["transfer", "--from", "csv", "--to", "csv"])
        .arg("--input")
        .arg(&input)
        .arg("--output")
        .arg(&input)
        .assert()
        .failure();
    assert!(fs::read_to_string(&input).unwrap().starts_with("id,name,city"));
}

#[test]
fn test_cleanup_reports_removed_count() {
    let dir = TempDir::new().unwrap();
    let state = dir.path().join("state");
    let input = seed_input(&dir);

    cli(&state)
        .args(["transfer", "--from", "csv", "--to", "jsonl", "--operation-id", "fresh"])
        .arg("--input")
        .arg(&input)
        .arg("--output")
        .arg(dir.path().join("fresh.jsonl"))
        .assert()
        .success();

    let kept = cli(&state)
        .args(["--output-format", "json", "cleanup", "--max-age-days", "7"])
        .assert()
        .success();
    assert_eq!(stdout_json(kept.get_output())["removed"], 0);

    let status = cli(&state)
        .args(["--output-format", "json", "status"])
        .assert()
        .success();
    assert_eq!(stdout_json(status.get_output()).as_array().unwrap().len(), 1);
}

#[test]
fn test_invalid_batch_size_rejected_by_parser() {
    let dir = TempDir::new().unwrap();
    cli(&dir.path().join("state"))
        .args(["transfer", "--from", "csv", "--to", "jsonl", "--input", "a", "--output", "b"])
        .args(["--batch-size", "0"])
        .assert()
        .failure();
}
