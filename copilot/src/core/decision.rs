//! Decision parser: raw oracle text to a validated [`Decision`].
//!
//! The oracle is asked for a bare JSON object but frequently wraps it in a
//! markdown fence or surrounds it with prose. Parsing is decode-then-validate:
//! locate the object, decode it, check it against the decision schema, then
//! build the envelope. Action tags are upper-cased but never rejected here.

use std::sync::LazyLock;

use jsonschema::{Draft, Validator};
use regex::Regex;
use serde_json::{Map, Value};

use crate::core::types::{Action, Decision};

const DECISION_SCHEMA: &str = include_str!("../../schemas/decision.schema.json");

#[derive(Debug, thiserror::Error)]
pub enum DecisionParseError {
    #[error("no JSON object found in oracle response")]
    NoJsonObject,
    #[error("invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("decision does not match schema: {}", .0.join("; "))]
    Schema(Vec<String>),
}

/// Parse the oracle's raw response into a decision.
pub fn parse_decision(raw: &str) -> Result<Decision, DecisionParseError> {
    let object = extract_json_object(raw)?;
    validate_schema(&object)?;

    let action = object
        .get("action")
        .and_then(Value::as_str)
        .map(|tag| tag.trim().to_uppercase())
        .unwrap_or_default();
    let content = object.get("content").map(value_text).unwrap_or_default();
    let context_update = object
        .get("context_update")
        .map(value_text)
        .filter(|text| !text.trim().is_empty());

    Ok(Decision {
        action: Action::from_tag(&action),
        content,
        context_update,
    })
}

/// Locate and decode the first JSON object in `raw`.
///
/// A surrounding code fence (```` ```json ```` or bare ```` ``` ````) is stripped
/// first; decoding then starts at the first `{` and stops after one complete
/// value, so trailing prose (braces included) is ignored.
pub fn extract_json_object(raw: &str) -> Result<Map<String, Value>, DecisionParseError> {
    static FENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?s)```[A-Za-z]*[ \t]*\r?\n?(.*?)```").expect("fence regex is valid")
    });

    let body = FENCE_RE
        .captures(raw)
        .and_then(|caps| caps.get(1))
        .map_or(raw, |m| m.as_str());

    let start = body.find('{').ok_or(DecisionParseError::NoJsonObject)?;
    let value = serde_json::Deserializer::from_str(&body[start..])
        .into_iter::<Value>()
        .next()
        .ok_or(DecisionParseError::NoJsonObject)??;

    match value {
        Value::Object(map) => Ok(map),
        _ => Err(DecisionParseError::NoJsonObject),
    }
}

fn validate_schema(object: &Map<String, Value>) -> Result<(), DecisionParseError> {
    static VALIDATOR: LazyLock<Validator> = LazyLock::new(|| {
        let schema: Value =
            serde_json::from_str(DECISION_SCHEMA).expect("decision schema is valid JSON");
        jsonschema::options()
            .with_draft(Draft::Draft202012)
            .build(&schema)
            .expect("decision schema compiles")
    });

    let instance = Value::Object(object.clone());
    let messages: Vec<String> = VALIDATOR
        .iter_errors(&instance)
        .map(|err| err.to_string())
        .collect();
    if !messages.is_empty() {
        return Err(DecisionParseError::Schema(messages));
    }
    Ok(())
}

/// Strings pass through; any other JSON value is kept as its compact encoding.
fn value_text(value: &Value) -> String {
    match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_bare_object() {
        let decision =
            parse_decision(r#"{"action": "THINK", "content": "look at sales first"}"#)
                .expect("parse");
        assert_eq!(decision.action, Action::Think);
        assert_eq!(decision.content, "look at sales first");
        assert_eq!(decision.context_update, None);
    }

    #[test]
    fn strips_json_fence_and_prose() {
        let raw = "Sure, here is my decision:\n```json\n{\n  \"action\": \"act\",\n  \"content\": \"print(1)\",\n  \"context_update\": \"checking totals\"\n}\n```\nLet me know.";
        let decision = parse_decision(raw).expect("parse");
        assert_eq!(decision.action, Action::Act);
        assert_eq!(decision.content, "print(1)");
        assert_eq!(decision.context_update.as_deref(), Some("checking totals"));
    }

    #[test]
    fn strips_bare_fence() {
        let raw = "```\n{\"action\": \"Done\", \"content\": \"final\"}\n```";
        let decision = parse_decision(raw).expect("parse");
        assert_eq!(decision.action, Action::Done);
    }

    #[test]
    fn ignores_trailing_prose_with_braces() {
        let decision = parse_decision(
            r#"{"action": "THINK", "content": "check totals"} (format used: {action, content})"#,
        )
        .expect("parse");
        assert_eq!(decision.action, Action::Think);
        assert_eq!(decision.content, "check totals");
    }

    #[test]
    fn unknown_action_is_not_rejected() {
        let decision =
            parse_decision(r#"{"action": "plot", "content": "x"}"#).expect("parse");
        assert_eq!(decision.action, Action::Unrecognized("PLOT".to_string()));
    }

    #[test]
    fn null_or_empty_context_update_is_none() {
        let decision = parse_decision(
            r#"{"action": "THINK", "content": "x", "context_update": null}"#,
        )
        .expect("parse");
        assert_eq!(decision.context_update, None);

        let decision =
            parse_decision(r#"{"action": "THINK", "content": "x", "context_update": "  "}"#)
                .expect("parse");
        assert_eq!(decision.context_update, None);
    }

    #[test]
    fn non_string_content_is_encoded() {
        let decision =
            parse_decision(r#"{"action": "THINK", "content": {"plan": [1, 2]}}"#).expect("parse");
        assert_eq!(decision.content, r#"{"plan":[1,2]}"#);
    }

    #[test]
    fn rejects_text_without_object() {
        let err = parse_decision("I think we should look at the data").unwrap_err();
        assert!(matches!(err, DecisionParseError::NoJsonObject));
    }

    #[test]
    fn rejects_malformed_json() {
        let err = parse_decision(r#"{"action": "THINK", "content": }"#).unwrap_err();
        assert!(matches!(err, DecisionParseError::InvalidJson(_)));
    }

    #[test]
    fn rejects_missing_required_fields() {
        let err = parse_decision(r#"{"action": "THINK"}"#).unwrap_err();
        assert!(matches!(err, DecisionParseError::Schema(_)));
        assert!(err.to_string().contains("content"));

        let err = parse_decision(r#"{"content": "x"}"#).unwrap_err();
        assert!(matches!(err, DecisionParseError::Schema(_)));
        assert!(err.to_string().contains("action"));
    }

    #[test]
    fn rejects_non_string_action() {
        let err = parse_decision(r#"{"action": 3, "content": "x"}"#).unwrap_err();
        assert!(matches!(err, DecisionParseError::Schema(_)));
    }
}
