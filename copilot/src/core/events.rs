//! Progress events emitted by the orchestration loop.
//!
//! One event per transition, in step order. Events are emitted only after the
//! corresponding state has been persisted.

use serde::Serialize;

use crate::core::types::LoopState;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    Start {
        step: u32,
        goal: String,
        max_loops: u32,
    },
    Think {
        step: u32,
        content: String,
        context_updated: bool,
    },
    ActStart {
        step: u32,
    },
    ActComplete {
        step: u32,
        stdout: String,
        stderr: String,
        insight: String,
        context_updated: bool,
    },
    SearchStart {
        step: u32,
        query: String,
    },
    SearchComplete {
        step: u32,
        result: String,
        context_updated: bool,
    },
    Done {
        step: u32,
        final_insight: String,
    },
    Error {
        step: u32,
        message: String,
    },
    Complete {
        total_steps: u32,
        state: LoopState,
        reason: Option<String>,
    },
}

impl ProgressEvent {
    /// Step number the event belongs to (`complete` reports the total).
    pub fn step(&self) -> u32 {
        match self {
            ProgressEvent::Start { step, .. }
            | ProgressEvent::Think { step, .. }
            | ProgressEvent::ActStart { step }
            | ProgressEvent::ActComplete { step, .. }
            | ProgressEvent::SearchStart { step, .. }
            | ProgressEvent::SearchComplete { step, .. }
            | ProgressEvent::Done { step, .. }
            | ProgressEvent::Error { step, .. } => *step,
            ProgressEvent::Complete { total_steps, .. } => *total_steps,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ProgressEvent::Start { .. } => "start",
            ProgressEvent::Think { .. } => "think",
            ProgressEvent::ActStart { .. } => "act_start",
            ProgressEvent::ActComplete { .. } => "act_complete",
            ProgressEvent::SearchStart { .. } => "search_start",
            ProgressEvent::SearchComplete { .. } => "search_complete",
            ProgressEvent::Done { .. } => "done",
            ProgressEvent::Error { .. } => "error",
            ProgressEvent::Complete { .. } => "complete",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_snake_case_type_tag() {
        let event = ProgressEvent::ActStart { step: 2 };
        let json = serde_json::to_string(&event).expect("serialize");
        assert_eq!(json, r#"{"type":"act_start","step":2}"#);
        assert_eq!(event.kind(), "act_start");
    }

    #[test]
    fn complete_reports_total_steps() {
        let event = ProgressEvent::Complete {
            total_steps: 4,
            state: LoopState::Exhausted,
            reason: Some("max loops reached".to_string()),
        };
        assert_eq!(event.step(), 4);
        let json = serde_json::to_value(&event).expect("serialize");
        assert_eq!(json["state"], "exhausted");
    }
}
