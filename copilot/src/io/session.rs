//! Session namespace layout and bootstrap.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use serde_json::json;
use tracing::info;

use super::context::{ContextDocument, write_context};
use super::json::write_json_atomic;

/// Placeholder the oracle is told to use for dataset paths in generated code.
pub const DATASETS_PLACEHOLDER: &str = "storage/<session_id>/datasets/";

/// All canonical paths within one session namespace.
///
/// Every component receives this handle explicitly; nothing is process-global.
#[derive(Debug, Clone)]
pub struct SessionPaths {
    pub session_id: String,
    pub dir: PathBuf,
    pub datasets_dir: PathBuf,
    pub scripts_dir: PathBuf,
    pub results_dir: PathBuf,
    pub context_path: PathBuf,
    pub dataset_metadata_path: PathBuf,
    pub chat_history_path: PathBuf,
    pub step_log_path: PathBuf,
    pub final_insight_path: PathBuf,
}

impl SessionPaths {
    pub fn new(storage_root: &Path, session_id: &str) -> Self {
        let dir = storage_root.join(session_id);
        Self {
            session_id: session_id.to_string(),
            dir: dir.clone(),
            datasets_dir: dir.join("datasets"),
            scripts_dir: dir.join("scripts"),
            results_dir: dir.join("results"),
            context_path: dir.join("context.json"),
            dataset_metadata_path: dir.join("dataset_metadata.json"),
            chat_history_path: dir.join("chat_history.json"),
            step_log_path: dir.join("cotas_log.json"),
            final_insight_path: dir.join("final_insight.txt"),
        }
    }

    /// Resolve an existing session, failing if its namespace is missing.
    ///
    /// The id must name a single directory directly under `storage_root`.
    pub fn open(storage_root: &Path, session_id: &str) -> Result<Self> {
        if session_id.is_empty()
            || session_id == "."
            || session_id == ".."
            || session_id.contains(['/', '\\'])
        {
            return Err(anyhow!("invalid session id '{session_id}'"));
        }
        let paths = Self::new(storage_root, session_id);
        if !paths.dir.is_dir() {
            return Err(anyhow!(
                "unknown session '{session_id}' (no directory at {})",
                paths.dir.display()
            ));
        }
        Ok(paths)
    }

    /// Per-step script artifact, e.g. `scripts/step_003.py`.
    pub fn script_path(&self, step: u32, extension: &str) -> PathBuf {
        self.scripts_dir.join(format!("step_{step:03}.{extension}"))
    }

    /// Per-step execution result artifact, e.g. `results/step_003.txt`.
    pub fn result_path(&self, step: u32) -> PathBuf {
        self.results_dir.join(format!("step_{step:03}.txt"))
    }

    /// Replace the dataset placeholder in generated code with this session's directory.
    pub fn materialize_dataset_paths(&self, code: &str) -> String {
        let mut datasets = self.datasets_dir.display().to_string();
        if !datasets.ends_with('/') {
            datasets.push('/');
        }
        code.replace(DATASETS_PLACEHOLDER, &datasets)
    }
}

/// Create a fresh session namespace with a new UUID v4 identifier.
pub fn create_session(storage_root: &Path) -> Result<SessionPaths> {
    let session_id = uuid::Uuid::new_v4().to_string();
    let paths = SessionPaths::new(storage_root, &session_id);

    for dir in [
        &paths.dir,
        &paths.datasets_dir,
        &paths.scripts_dir,
        &paths.results_dir,
    ] {
        fs::create_dir_all(dir).with_context(|| format!("create {}", dir.display()))?;
    }

    write_context(&paths.context_path, &ContextDocument::default())?;
    write_json_atomic(&paths.dataset_metadata_path, &json!({ "datasets": [] }))?;
    write_json_atomic(&paths.chat_history_path, &json!({ "messages": [] }))?;

    info!(session_id = %paths.session_id, dir = %paths.dir.display(), "session created");
    Ok(paths)
}
