//! Step Log: the append-only audit record of a session's run (`cotas_log.json`).
//!
//! This is the recovery point. How far a run got is answered from this file
//! alone: step numbers are contiguous from 1, records are only ever appended,
//! and the single trailing summary (`end_time`, `completed`, `reason`) is
//! stamped once when the loop reaches a terminal state.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::clock::unix_now;
use super::json::write_json_atomic;

/// Persisted run log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepLog {
    pub goal: String,
    #[serde(default)]
    pub steps: Vec<StepRecord>,
    pub start_time: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl StepLog {
    pub fn new(goal: &str) -> Self {
        Self {
            goal: goal.to_string(),
            steps: Vec::new(),
            start_time: unix_now(),
            end_time: None,
            completed: None,
            reason: None,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.end_time.is_some()
    }

    /// Number of the last recorded step (0 when empty).
    pub fn last_step(&self) -> u32 {
        self.steps.last().map_or(0, |record| record.step)
    }
}

/// One recorded iteration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepRecord {
    pub step: u32,
    #[serde(flatten)]
    pub body: StepBody,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_update: Option<String>,
    pub timestamp: i64,
}

impl StepRecord {
    pub fn new(step: u32, body: StepBody, context_update: Option<String>) -> Self {
        Self {
            step,
            body,
            context_update,
            timestamp: unix_now(),
        }
    }

    /// Text this step hands to the next decision prompt, if any.
    pub fn output(&self) -> Option<&str> {
        match &self.body {
            StepBody::Think { content } => Some(content),
            StepBody::Act(act) => Some(&act.insight),
            StepBody::Search { result, .. } => Some(result),
            StepBody::Done { final_insight } => Some(final_insight),
            StepBody::Error { .. } => None,
        }
    }
}

/// Action-specific payload, tagged by `action` in the persisted JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepBody {
    Think { content: String },
    Act(ActRecord),
    Search { query: String, result: String },
    Done { final_insight: String },
    Error { error: String },
}

impl StepBody {
    pub fn tag(&self) -> &'static str {
        match self {
            StepBody::Think { .. } => "THINK",
            StepBody::Act(_) => "ACT",
            StepBody::Search { .. } => "SEARCH",
            StepBody::Done { .. } => "DONE",
            StepBody::Error { .. } => "ERROR",
        }
    }
}

/// Outcome of an ACT step. Output fields are truncated for the log; the full
/// capture lives in the per-step result file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActRecord {
    /// Script file name under `scripts/` (absent if saving failed).
    pub script: Option<String>,
    /// Result file name under `results/` (absent if saving failed).
    pub result: Option<String>,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub timed_out: bool,
    pub insight: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Load the log. Unlike the context document, a corrupt log is an error.
pub fn load_step_log(path: &Path) -> Result<Option<StepLog>> {
    if !path.exists() {
        return Ok(None);
    }
    let contents =
        fs::read_to_string(path).with_context(|| format!("read step log {}", path.display()))?;
    let log = serde_json::from_str(&contents)
        .with_context(|| format!("parse step log {}", path.display()))?;
    Ok(Some(log))
}

/// Start a fresh log for `goal`, replacing any previous run's log.
pub fn begin_step_log(path: &Path, goal: &str) -> Result<StepLog> {
    let log = StepLog::new(goal);
    write_json_atomic(path, &log)?;
    Ok(log)
}

/// Append `record`, creating a default log for `goal` if none exists.
///
/// Rejects records that would break contiguous numbering or extend a
/// finalized log.
pub fn append_step(path: &Path, goal: &str, record: StepRecord) -> Result<StepLog> {
    let mut log = load_step_log(path)?.unwrap_or_else(|| StepLog::new(goal));
    if log.is_finalized() {
        return Err(anyhow!(
            "step log {} is finalized; refusing to append step {}",
            path.display(),
            record.step
        ));
    }
    let expected = log.last_step() + 1;
    if record.step != expected {
        return Err(anyhow!(
            "non-contiguous step {}: expected {}",
            record.step,
            expected
        ));
    }
    debug!(step = record.step, action = record.body.tag(), "appending step record");
    log.steps.push(record);
    write_json_atomic(path, &log)?;
    Ok(log)
}

/// Stamp the trailing summary. Returns `false` (and writes nothing) if the log
/// was already finalized.
pub fn finalize_step_log(path: &Path, completed: bool, reason: Option<&str>) -> Result<bool> {
    let mut log = load_step_log(path)?
        .ok_or_else(|| anyhow!("no step log to finalize at {}", path.display()))?;
    if log.is_finalized() {
        debug!(path = %path.display(), "step log already finalized");
        return Ok(false);
    }
    log.end_time = Some(unix_now());
    log.completed = Some(completed);
    log.reason = reason.map(str::to_string);
    write_json_atomic(path, &log)?;
    Ok(true)
}
