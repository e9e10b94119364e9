//! CLI integration tests
//!
//! Runs the tributary binary non-interactively against a temporary data
//! directory.

use std::path::Path;
use std::process::{Command, Output};

fn tributary(data_dir: &Path, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_tributary"))
        .arg("--data-dir")
        .arg(data_dir)
        .arg("--config")
        .arg(data_dir.join("config.toml"))
        .arg("--no-color")
        .args(args)
        .env("RUST_LOG", "warn")
        .output()
        .expect("Failed to execute tributary")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

#[test]
fn test_help_flag() {
    let output = Command::new(env!("CARGO_BIN_EXE_tributary"))
        .arg("--help")
        .output()
        .expect("Failed to execute tributary");

    assert!(output.status.success());
    assert!(stdout(&output).contains("tributary"));
}

#[test]
fn test_execute_and_replay_across_runs() {
    let dir = tempfile::tempdir().unwrap();

    let first = tributary(
        dir.path(),
        &[
            "-e",
            "CREATE STREAM ORDERS (ID VARCHAR, UNITS DOUBLE) WITH (kafka_topic='orders', value_format='json');",
        ],
    );
    assert!(first.status.success(), "{:?}", first);
    assert!(stdout(&first).contains("Stream created"));

    // The second process rebuilds its metadata from the command log.
    let second = tributary(dir.path(), &["-e", "LIST STREAMS; DESCRIBE ORDERS;"]);
    assert!(second.status.success(), "{:?}", second);
    let out = stdout(&second);
    assert!(out.contains("ORDERS"));
    assert!(out.contains("VARCHAR(STRING)"));
}

#[test]
fn test_failed_statement_sets_exit_status() {
    let dir = tempfile::tempdir().unwrap();
    let output = tributary(dir.path(), &["-e", "DROP STREAM MISSING;"]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Source MISSING does not exist."), "{}", stderr);
}

#[test]
fn test_json_output() {
    let dir = tempfile::tempdir().unwrap();
    let output = tributary(dir.path(), &["--output", "json", "-e", "LIST STREAMS;"]);

    assert!(output.status.success(), "{:?}", output);
    assert_eq!(stdout(&output).trim(), "[]");
}

#[test]
fn test_script_file() {
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("setup.sql");
    std::fs::write(
        &script,
        "REGISTER TOPIC AUDIT WITH (kafka_topic='audit', \\\n\
         value_format='json');\n\
         SET 'auto.offset.reset'='earliest';\n\
         LIST REGISTERED TOPICS;\n",
    )
    .unwrap();

    let output = tributary(dir.path(), &["--file", script.to_str().unwrap()]);
    assert!(output.status.success(), "{:?}", output);
    let out = stdout(&output);
    assert!(out.contains("Topic registered"));
    assert!(out.contains("Successfully changed local property 'auto.offset.reset' to 'earliest'."));
    assert!(out.contains("AUDIT"));
}
