//! Copilot configuration stored under `<storage>/config.toml`.

use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};

use super::json::write_atomic;

/// Copilot configuration (TOML).
///
/// Missing fields default to the values a fresh install runs with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct CopilotConfig {
    /// Iteration bound for one run of the loop.
    pub max_loops: u32,

    /// When the bound is hit, ask the oracle for a closing summary.
    pub summarize_on_exhaustion: bool,

    /// Capacity of the bounded progress-event channel.
    pub event_buffer: usize,

    pub sandbox: SandboxConfig,
    pub oracle: OracleConfig,
    pub search: SearchConfig,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SandboxStrategy {
    Process,
    Container,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SandboxConfig {
    pub strategy: SandboxStrategy,

    /// Interpreter for the `process` strategy; the script path is appended.
    pub interpreter: Vec<String>,

    /// Extension for saved and temporary scripts.
    pub script_extension: String,

    pub container_runtime: String,
    pub container_image: String,
    /// Interpreter inside the container; the code is fed on stdin.
    pub container_interpreter: Vec<String>,

    /// Wall-clock limit per ACT execution.
    pub timeout_secs: u64,

    /// Cap on captured stdout/stderr per stream.
    pub output_limit_bytes: usize,

    /// Cap on stdout/stderr embedded in a step record.
    pub record_output_limit_bytes: usize,
}

impl SandboxConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            strategy: SandboxStrategy::Process,
            interpreter: vec!["python3".to_string()],
            script_extension: "py".to_string(),
            container_runtime: "docker".to_string(),
            container_image: "python:3.12-slim".to_string(),
            container_interpreter: vec!["python".to_string(), "-".to_string()],
            timeout_secs: 30,
            output_limit_bytes: 20_000,
            record_output_limit_bytes: 1_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct OracleConfig {
    /// Command that reads a prompt on stdin and writes the reply to stdout.
    pub command: Vec<String>,

    pub timeout_secs: u64,

    pub output_limit_bytes: usize,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            command: vec!["llm".to_string()],
            timeout_secs: 5 * 60,
            output_limit_bytes: 1_000_000,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SearchBackend {
    /// Substring search over the session's context history.
    Context,
    /// Google Custom Search JSON API.
    Web,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct SearchConfig {
    pub backend: SearchBackend,
    pub max_results: usize,
    pub cache_ttl_secs: u64,
    pub endpoint: String,
    pub timeout_secs: u64,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            backend: SearchBackend::Context,
            max_results: 5,
            cache_ttl_secs: 24 * 60 * 60,
            endpoint: "https://www.googleapis.com/customsearch/v1".to_string(),
            timeout_secs: 10,
        }
    }
}

impl Default for CopilotConfig {
    fn default() -> Self {
        Self {
            max_loops: 15,
            summarize_on_exhaustion: false,
            event_buffer: 32,
            sandbox: SandboxConfig::default(),
            oracle: OracleConfig::default(),
            search: SearchConfig::default(),
        }
    }
}

impl CopilotConfig {
    pub fn validate(&self) -> Result<()> {
        if self.max_loops == 0 {
            return Err(anyhow!("max_loops must be > 0"));
        }
        if self.event_buffer == 0 {
            return Err(anyhow!("event_buffer must be > 0"));
        }
        if self.sandbox.timeout_secs == 0 {
            return Err(anyhow!("sandbox.timeout_secs must be > 0"));
        }
        if self.sandbox.output_limit_bytes == 0 {
            return Err(anyhow!("sandbox.output_limit_bytes must be > 0"));
        }
        if self.sandbox.record_output_limit_bytes == 0 {
            return Err(anyhow!("sandbox.record_output_limit_bytes must be > 0"));
        }
        if is_blank_command(&self.sandbox.interpreter) {
            return Err(anyhow!("sandbox.interpreter must be a non-empty array"));
        }
        if self.sandbox.strategy == SandboxStrategy::Container
            && is_blank_command(&self.sandbox.container_interpreter)
        {
            return Err(anyhow!(
                "sandbox.container_interpreter must be a non-empty array"
            ));
        }
        if is_blank_command(&self.oracle.command) {
            return Err(anyhow!("oracle.command must be a non-empty array"));
        }
        if self.oracle.timeout_secs == 0 {
            return Err(anyhow!("oracle.timeout_secs must be > 0"));
        }
        if self.search.max_results == 0 {
            return Err(anyhow!("search.max_results must be > 0"));
        }
        Ok(())
    }
}

fn is_blank_command(command: &[String]) -> bool {
    command.first().is_none_or(|program| program.trim().is_empty())
}

/// Load config from a TOML file.
///
/// If the file is missing, returns `CopilotConfig::default()`.
pub fn load_config(path: &Path) -> Result<CopilotConfig> {
    if !path.exists() {
        let cfg = CopilotConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: CopilotConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    cfg.validate()?;
    Ok(cfg)
}

/// Atomically write config to disk (temp file + rename).
pub fn write_config(path: &Path, cfg: &CopilotConfig) -> Result<()> {
    cfg.validate()?;
    let mut buf = toml::to_string_pretty(cfg).context("serialize config toml")?;
    buf.push('\n');
    write_atomic(path, &buf)
}
