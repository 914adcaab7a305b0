//! Read-only access to the session's dataset metadata document.
//!
//! The document is produced by the dataset ingestion collaborator; the loop
//! only embeds it in prompts.

use std::fs;
use std::path::Path;

use serde_json::{Value, json};
use tracing::warn;

/// Read `dataset_metadata.json`. Missing, corrupt, or non-object documents
/// read as `{"datasets": []}`.
pub fn read_metadata(path: &Path) -> Value {
    let contents = match fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(_) => return empty_metadata(),
    };
    match serde_json::from_str::<Value>(&contents) {
        Ok(value) if value.is_object() => value,
        Ok(_) | Err(_) => {
            warn!(path = %path.display(), "unusable dataset metadata, using empty");
            empty_metadata()
        }
    }
}

fn empty_metadata() -> Value {
    json!({ "datasets": [] })
}
