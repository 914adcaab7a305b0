//! Context Store: the per-session `context.json` memory document.
//!
//! The document is a best-effort memory aid, not the record of completed work
//! (that is the step log). Reads therefore never fail: a missing or corrupt
//! file yields an empty document.

use std::path::Path;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use super::clock::unix_now;
use super::json::{read_json_or_default, write_json_atomic};

/// One appended memory entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextEntry {
    pub content: String,
    /// Provenance, e.g. `step 3` or `user message`.
    pub source: String,
    pub timestamp: i64,
}

impl ContextEntry {
    pub fn now(content: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            content: content.into(),
            source: source.into(),
            timestamp: unix_now(),
        }
    }
}

/// Persisted context document.
///
/// `latest_update` always mirrors the content of the last entry in `history`.
/// Fields written by other collaborators are kept in `extra` so a
/// read-modify-write never drops them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextDocument {
    pub history: Vec<ContextEntry>,
    pub latest_update: Option<String>,
    pub last_updated: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl ContextDocument {
    /// Push `entry` and move the latest pointer to it.
    pub fn push(&mut self, entry: ContextEntry) {
        self.latest_update = Some(entry.content.clone());
        self.last_updated = Some(entry.timestamp);
        self.history.push(entry);
    }
}

/// Read the document, or an empty one if missing or unparseable.
pub fn read_context(path: &Path) -> ContextDocument {
    read_json_or_default(path)
}

/// Atomically overwrite the document, creating the session directory if absent.
pub fn write_context(path: &Path, doc: &ContextDocument) -> Result<()> {
    debug!(path = %path.display(), entries = doc.history.len(), "writing context");
    write_json_atomic(path, doc)
}

/// Read-modify-write append. Sessions are single-writer, so no locking.
pub fn append_entry(path: &Path, entry: ContextEntry) -> Result<ContextDocument> {
    let mut doc = read_context(path);
    doc.push(entry);
    write_context(path, &doc)?;
    Ok(doc)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn entry(content: &str, source: &str, timestamp: i64) -> ContextEntry {
        ContextEntry {
            content: content.to_string(),
            source: source.to_string(),
            timestamp,
        }
    }

    #[test]
    fn write_then_read_round_trips() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("session/context.json");

        let mut doc = ContextDocument::default();
        doc.push(entry("focus on Q3", "user message", 100));
        doc.push(entry("revenue dipped in March", "step 2", 120));
        doc.extra
            .insert("session_id".to_string(), Value::String("s-1".to_string()));

        write_context(&path, &doc).expect("write");
        assert_eq!(read_context(&path), doc);
    }

    #[test]
    fn missing_file_reads_as_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let doc = read_context(&temp.path().join("context.json"));
        assert_eq!(doc, ContextDocument::default());
        assert!(doc.latest_update.is_none());
    }

    #[test]
    fn corrupt_file_reads_as_empty() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("context.json");
        fs::write(&path, "][").expect("write");
        assert_eq!(read_context(&path), ContextDocument::default());
    }

    #[test]
    fn append_moves_latest_pointer() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("context.json");

        append_entry(&path, entry("first", "step 1", 10)).expect("append");
        let doc = append_entry(&path, entry("second", "step 2", 20)).expect("append");

        assert_eq!(doc.history.len(), 2);
        assert_eq!(doc.latest_update.as_deref(), Some("second"));
        assert_eq!(doc.last_updated, Some(20));
        assert_eq!(read_context(&path), doc);
    }

    #[test]
    fn append_preserves_foreign_fields() {
        let temp = tempfile::tempdir().expect("tempdir");
        let path = temp.path().join("context.json");
        fs::write(&path, r#"{"session_id": "s-9", "history": []}"#).expect("write");

        let doc = append_entry(&path, entry("note", "step 1", 1)).expect("append");
        assert_eq!(doc.extra.get("session_id"), Some(&Value::String("s-9".into())));
    }
}
