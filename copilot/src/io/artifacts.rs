//! Per-step artifacts: saved scripts, execution transcripts, the final insight.

use std::path::{Path, PathBuf};

use anyhow::Result;
use tracing::debug;

use super::json::write_atomic;
use super::session::SessionPaths;
use crate::io::sandbox::ExecutionResult;

/// Save the code exactly as the oracle produced it.
pub fn save_script(paths: &SessionPaths, step: u32, extension: &str, code: &str) -> Result<PathBuf> {
    let path = paths.script_path(step, extension);
    write_atomic(&path, code)?;
    debug!(path = %path.display(), "saved script");
    Ok(path)
}

/// Save the full (capped) execution transcript for a step.
pub fn save_result(paths: &SessionPaths, step: u32, result: &ExecutionResult) -> Result<PathBuf> {
    let path = paths.result_path(step);
    write_atomic(&path, &render_transcript(result))?;
    debug!(path = %path.display(), "saved execution result");
    Ok(path)
}

pub fn render_transcript(result: &ExecutionResult) -> String {
    format!(
        "=== STDOUT ===\n{}\n\n=== STDERR ===\n{}",
        result.stdout, result.stderr
    )
}

pub fn write_final_insight(path: &Path, insight: &str) -> Result<()> {
    write_atomic(path, insight)
}

/// File name component for recording an artifact in the step log.
pub fn file_name(path: &Path) -> Option<String> {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
}
