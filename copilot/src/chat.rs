//! Chat message handling: the collaborator that feeds user statements into the
//! session's context document.

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

use crate::core::decision::extract_json_object;
use crate::io::clock::unix_now;
use crate::io::context::{ContextEntry, append_entry, read_context};
use crate::io::json::{read_json_or_default, write_json_atomic};
use crate::io::metadata::read_metadata;
use crate::io::oracle::Oracle;
use crate::io::prompt::{ChatInputs, PromptEngine};
use crate::io::session::SessionPaths;

pub const USER_MESSAGE_SOURCE: &str = "user message";
const RECENT_TURNS: usize = 5;
const ERROR_RESPONSE: &str = "I encountered an error processing your message. Please try again.";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    User,
    Assistant,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub role: ChatRole,
    pub message: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context_update: Option<String>,
}

impl ChatTurn {
    fn now(role: ChatRole, message: impl Into<String>, context_update: Option<String>) -> Self {
        Self {
            role,
            message: message.into(),
            timestamp: unix_now(),
            context_update,
        }
    }
}

/// Persisted `chat_history.json`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatHistory {
    pub messages: Vec<ChatTurn>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

pub fn read_chat_history(path: &Path) -> ChatHistory {
    read_json_or_default(path)
}

fn append_turns(path: &Path, turns: Vec<ChatTurn>) -> Result<()> {
    let mut history = read_chat_history(path);
    history.messages.extend(turns);
    write_json_atomic(path, &history).context("write chat history")
}

/// What the caller shows the user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChatReply {
    pub response: String,
    pub needs_analysis: bool,
    pub context_updated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChatDecision {
    #[serde(default)]
    response: Option<String>,
    #[serde(default)]
    context_update: Option<String>,
    #[serde(default)]
    needs_analysis: bool,
}

/// Process one user message.
///
/// Oracle and parse failures are recorded as an `error` chat turn and reported
/// in [`ChatReply::error`]; only store I/O failures are returned as errors.
#[instrument(skip_all, fields(session = %paths.session_id, message_bytes = message.len()))]
pub fn handle_message<O: Oracle + ?Sized>(
    paths: &SessionPaths,
    oracle: &O,
    message: &str,
) -> Result<ChatReply> {
    let decision = match ask(paths, oracle, message) {
        Ok(decision) => decision,
        Err(err) => {
            let error = format!("Failed to process message: {err:#}");
            warn!(error = %error, "chat message failed");
            append_turns(
                &paths.chat_history_path,
                vec![ChatTurn::now(ChatRole::Error, error.clone(), None)],
            )?;
            return Ok(ChatReply {
                response: ERROR_RESPONSE.to_string(),
                needs_analysis: false,
                context_updated: false,
                error: Some(error),
            });
        }
    };

    let context_update = decision
        .context_update
        .map(|update| update.trim().to_string())
        .filter(|update| !update.is_empty());
    if let Some(update) = &context_update {
        append_entry(
            &paths.context_path,
            ContextEntry::now(update.clone(), USER_MESSAGE_SOURCE),
        )?;
    }

    let response = decision
        .response
        .unwrap_or_else(|| "I'm processing your message.".to_string());
    append_turns(
        &paths.chat_history_path,
        vec![
            ChatTurn::now(ChatRole::User, message, None),
            ChatTurn::now(ChatRole::Assistant, response.clone(), context_update.clone()),
        ],
    )?;

    info!(
        context_updated = context_update.is_some(),
        needs_analysis = decision.needs_analysis,
        "chat message handled"
    );
    Ok(ChatReply {
        response,
        needs_analysis: decision.needs_analysis,
        context_updated: context_update.is_some(),
        error: None,
    })
}

fn ask<O: Oracle + ?Sized>(paths: &SessionPaths, oracle: &O, message: &str) -> Result<ChatDecision> {
    let context = read_context(&paths.context_path);
    let metadata = read_metadata(&paths.dataset_metadata_path);
    let history = read_chat_history(&paths.chat_history_path);
    let recent = &history.messages[history.messages.len().saturating_sub(RECENT_TURNS)..];

    let prompt = PromptEngine::new().render_chat(&ChatInputs {
        context: &context,
        metadata: &metadata,
        recent_history: recent,
        message,
    })?;
    let raw = oracle.generate(&prompt)?;
    let object = extract_json_object(&raw)?;
    serde_json::from_value(Value::Object(object)).context("decode chat reply")
}
