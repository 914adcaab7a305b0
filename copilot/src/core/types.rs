//! Shared deterministic types for the CoTAS loop.
//!
//! These types define stable contracts between the decision parser, the
//! orchestration loop and the persisted artifacts. They carry no I/O.

use serde::{Deserialize, Serialize};

/// Action tag chosen by the oracle for one step.
///
/// Parsing never rejects a tag: anything outside the known set is kept as
/// [`Action::Unrecognized`] and refused by the loop's policy.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    Think,
    Act,
    Search,
    Done,
    Unrecognized(String),
}

impl Action {
    /// Map an already upper-cased tag to an action.
    pub fn from_tag(tag: &str) -> Self {
        match tag {
            "THINK" => Action::Think,
            "ACT" => Action::Act,
            "SEARCH" => Action::Search,
            "DONE" => Action::Done,
            other => Action::Unrecognized(other.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Action::Think => "THINK",
            Action::Act => "ACT",
            Action::Search => "SEARCH",
            Action::Done => "DONE",
            Action::Unrecognized(tag) => tag.as_str(),
        }
    }
}

/// Structured next step extracted from oracle text. Lives for one iteration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub action: Action,
    pub content: String,
    pub context_update: Option<String>,
}

/// Orchestration loop state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LoopState {
    Running,
    Done,
    Error,
    /// Iteration bound reached without `DONE`. A normal outcome, not an error.
    Exhausted,
}

impl LoopState {
    pub fn is_terminal(self) -> bool {
        !matches!(self, LoopState::Running)
    }
}
