//! Loop-level harness tests for full CoTAS run scenarios.
//!
//! These tests drive `run_cotas` with scripted collaborators to verify
//! end-to-end behavior: step numbering, terminal states, persisted artifacts,
//! and the progress event stream.

use std::fs;
use std::time::Duration;

use copilot::core::events::ProgressEvent;
use copilot::core::types::LoopState;
use copilot::cotas::{LoopConfig, RunRequest, run_cotas};
use copilot::io::sandbox::{ExecutionResult, ProcessSandbox};
use copilot::io::step_log::{StepBody, load_step_log};
use copilot::test_support::{ScriptedLookup, ScriptedOracle, ScriptedSandbox, TestSession};

fn request(goal: &str) -> RunRequest {
    RunRequest {
        goal: goal.to_string(),
        resume: false,
    }
}

/// THINK, ACT, DONE: three records, final artifact equals the DONE content.
#[test]
fn think_act_done_completes_with_final_insight() {
    let session = TestSession::new().expect("session");
    let oracle = ScriptedOracle::new(vec![
        r#"{"action": "THINK", "content": "Load sales and sum revenue by region."}"#,
        "```json\n{\"action\": \"ACT\", \"content\": \"print(sum([1, 2, 3]))\", \"context_update\": \"summing revenue\"}\n```",
        "Total revenue is 6.",
        r#"{"action": "DONE", "content": "Revenue totals 6 across regions."}"#,
    ]);
    let sandbox = ScriptedSandbox::new(vec![ExecutionResult {
        stdout: "6\n".to_string(),
        stderr: String::new(),
        exit_code: Some(0),
        timed_out: false,
    }]);
    let mut events = Vec::new();

    let outcome = run_cotas(
        session.paths(),
        &oracle,
        &sandbox,
        &ScriptedLookup::empty(),
        &LoopConfig::default(),
        &request("total revenue"),
        &mut events,
    )
    .expect("run");

    assert_eq!(outcome.state, LoopState::Done);
    assert_eq!(outcome.steps_taken, 3);
    oracle.assert_drained();

    let paths = session.paths();
    let log = load_step_log(&paths.step_log_path)
        .expect("load")
        .expect("log");
    let tags: Vec<&str> = log.steps.iter().map(|r| r.body.tag()).collect();
    assert_eq!(tags, vec!["THINK", "ACT", "DONE"]);
    let numbers: Vec<u32> = log.steps.iter().map(|r| r.step).collect();
    assert_eq!(numbers, vec![1, 2, 3]);
    assert_eq!(log.steps[1].context_update.as_deref(), Some("summing revenue"));
    assert_eq!(log.completed, Some(true));
    assert_eq!(log.reason.as_deref(), Some("goal satisfied"));
    assert!(log.end_time.is_some());

    let final_insight = fs::read_to_string(&paths.final_insight_path).expect("final insight");
    assert_eq!(final_insight, "Revenue totals 6 across regions.");

    let kinds: Vec<&str> = events.iter().map(ProgressEvent::kind).collect();
    assert_eq!(
        kinds,
        vec![
            "start",
            "think",
            "act_start",
            "act_complete",
            "done",
            "complete"
        ]
    );
    assert_eq!(
        events.last(),
        Some(&ProgressEvent::Complete {
            total_steps: 3,
            state: LoopState::Done,
            reason: Some("goal satisfied".to_string()),
        })
    );
}

/// Garbage on step 1: ERROR after exactly one record and no further oracle calls.
#[test]
fn unparseable_first_decision_stops_the_run() {
    let session = TestSession::new().expect("session");
    let oracle = ScriptedOracle::new(vec![
        "Sure! I think we should look at the data first.",
        r#"{"action": "DONE", "content": "never reached"}"#,
    ]);
    let mut events = Vec::new();

    let outcome = run_cotas(
        session.paths(),
        &oracle,
        &ScriptedSandbox::empty(),
        &ScriptedLookup::empty(),
        &LoopConfig::default(),
        &request("anything"),
        &mut events,
    )
    .expect("run");

    assert_eq!(outcome.state, LoopState::Error);
    assert_eq!(oracle.calls(), 1);

    let log = load_step_log(&session.paths().step_log_path)
        .expect("load")
        .expect("log");
    assert_eq!(log.steps.len(), 1);
    let StepBody::Error { error } = &log.steps[0].body else {
        panic!("expected ERROR record");
    };
    assert!(error.starts_with("Failed to parse decision"));
    assert!(error.contains("look at the data first"));
    assert_eq!(log.completed, Some(false));
    assert_eq!(log.reason.as_deref(), Some(error.as_str()));

    let kinds: Vec<&str> = events.iter().map(ProgressEvent::kind).collect();
    assert_eq!(kinds, vec!["start", "error", "complete"]);
    assert!(!session.paths().final_insight_path.exists());
}

/// Iteration bound reached without DONE is EXHAUSTED, not an error.
#[test]
fn bound_reached_is_exhausted() {
    let session = TestSession::new().expect("session");
    let oracle = ScriptedOracle::new(vec![
        r#"{"action": "THINK", "content": "first"}"#,
        r#"{"action": "THINK", "content": "second"}"#,
    ]);
    let config = LoopConfig {
        max_loops: 2,
        ..LoopConfig::default()
    };
    let mut events = Vec::new();

    let outcome = run_cotas(
        session.paths(),
        &oracle,
        &ScriptedSandbox::empty(),
        &ScriptedLookup::empty(),
        &config,
        &request("keep thinking"),
        &mut events,
    )
    .expect("run");

    assert_eq!(outcome.state, LoopState::Exhausted);
    assert_eq!(outcome.reason.as_deref(), Some("max loops reached"));
    assert_eq!(outcome.final_insight, None);
    oracle.assert_drained();

    let log = load_step_log(&session.paths().step_log_path)
        .expect("load")
        .expect("log");
    assert_eq!(log.steps.len(), 2);
    assert_eq!(log.completed, Some(false));
    assert_eq!(log.reason.as_deref(), Some("max loops reached"));
    assert!(oracle.prompts()[1].contains("COMPLETED STEPS: 1/2"));
}

/// Failing ACT code is recorded with its stderr, interpreted, and the loop goes on.
#[test]
fn failing_act_is_recorded_and_loop_continues() {
    let session = TestSession::new().expect("session");
    let oracle = ScriptedOracle::new(vec![
        r#"{"action": "ACT", "content": "echo 'no such column: revenue' >&2\nexit 1"}"#,
        "The column is missing; inspect the schema next.",
        r#"{"action": "DONE", "content": "Dataset lacks a revenue column."}"#,
    ]);
    let sandbox = ProcessSandbox::new(vec!["sh".to_string()], "sh".to_string(), 4096);
    let config = LoopConfig {
        sandbox_timeout: Duration::from_secs(5),
        script_extension: "sh".to_string(),
        ..LoopConfig::default()
    };
    let mut events = Vec::new();

    let outcome = run_cotas(
        session.paths(),
        &oracle,
        &sandbox,
        &ScriptedLookup::empty(),
        &config,
        &request("sum revenue"),
        &mut events,
    )
    .expect("run");

    assert_eq!(outcome.state, LoopState::Done);
    let log = load_step_log(&session.paths().step_log_path)
        .expect("load")
        .expect("log");
    let StepBody::Act(act) = &log.steps[0].body else {
        panic!("expected ACT record");
    };
    assert_eq!(act.exit_code, Some(1));
    assert!(act.stderr.contains("no such column: revenue"));
    assert_eq!(act.insight, "The column is missing; inspect the schema next.");
    assert!(act.error.is_none());
    assert!(session.paths().script_path(1, "sh").exists());

    let prompts = oracle.prompts();
    assert!(prompts[1].contains("no such column: revenue"));
    assert!(prompts[2].contains("The column is missing"));
}
