//! CLI tests for the `copilot` binary.
//!
//! Spawns the binary against a temporary storage root and verifies session
//! bootstrap, the JSON event stream and exit codes. The oracle is a shell
//! command configured in `config.toml`.

use std::fs;
use std::path::Path;
use std::process::Command;

use copilot::exit_codes;
use copilot::io::config::{CopilotConfig, write_config};
use serde_json::Value;

fn copilot(storage: &Path) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_copilot"));
    cmd.arg("--storage").arg(storage);
    cmd
}

fn new_session(storage: &Path) -> String {
    let output = copilot(storage)
        .args(["session", "new"])
        .output()
        .expect("copilot session new");
    assert!(output.status.success());
    String::from_utf8(output.stdout)
        .expect("utf8")
        .trim()
        .to_string()
}

fn configure_oracle(storage: &Path, reply: &str) {
    let mut cfg = CopilotConfig::default();
    cfg.oracle.command = vec![
        "sh".to_string(),
        "-c".to_string(),
        format!("cat >/dev/null; printf '%s' '{reply}'"),
    ];
    write_config(&storage.join("config.toml"), &cfg).expect("write config");
}

#[test]
fn session_new_scaffolds_namespace() {
    let temp = tempfile::tempdir().expect("tempdir");
    let id = new_session(temp.path());

    let dir = temp.path().join(&id);
    assert!(dir.join("context.json").is_file());
    assert!(dir.join("datasets").is_dir());

    let output = copilot(temp.path())
        .args(["context", "--session", &id])
        .output()
        .expect("copilot context");
    assert!(output.status.success());
    let doc: Value = serde_json::from_slice(&output.stdout).expect("context json");
    assert_eq!(doc["history"], Value::Array(Vec::new()));
}

#[test]
fn run_streams_events_and_exits_ok_on_done() {
    let temp = tempfile::tempdir().expect("tempdir");
    let id = new_session(temp.path());
    configure_oracle(temp.path(), r#"{"action": "DONE", "content": "nothing to analyze"}"#);

    let output = copilot(temp.path())
        .args(["run", "--session", &id, "--goal", "check the data"])
        .output()
        .expect("copilot run");
    assert_eq!(output.status.code(), Some(exit_codes::OK));

    let events: Vec<Value> = String::from_utf8(output.stdout)
        .expect("utf8")
        .lines()
        .map(|line| serde_json::from_str(line).expect("event json"))
        .collect();
    let types: Vec<&str> = events
        .iter()
        .map(|event| event["type"].as_str().expect("type"))
        .collect();
    assert_eq!(types, vec!["start", "done", "complete"]);
    assert_eq!(events[1]["final_insight"], "nothing to analyze");
    assert_eq!(events[2]["state"], "done");

    let final_insight =
        fs::read_to_string(temp.path().join(&id).join("final_insight.txt")).expect("insight");
    assert_eq!(final_insight, "nothing to analyze");
}

#[test]
fn run_exits_with_error_code_on_garbage() {
    let temp = tempfile::tempdir().expect("tempdir");
    let id = new_session(temp.path());
    configure_oracle(temp.path(), "no json here");

    let status = copilot(temp.path())
        .args(["run", "--session", &id, "--goal", "anything"])
        .status()
        .expect("copilot run");
    assert_eq!(status.code(), Some(exit_codes::ERROR));

    let output = copilot(temp.path())
        .args(["log", "--session", &id])
        .output()
        .expect("copilot log");
    let log: Value = serde_json::from_slice(&output.stdout).expect("log json");
    assert_eq!(log["steps"][0]["action"], "ERROR");
    assert_eq!(log["completed"], false);
}

#[test]
fn unknown_session_is_invalid() {
    let temp = tempfile::tempdir().expect("tempdir");
    let status = copilot(temp.path())
        .args(["log", "--session", "missing"])
        .status()
        .expect("copilot log");
    assert_eq!(status.code(), Some(exit_codes::INVALID));
}
