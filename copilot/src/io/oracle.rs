//! Oracle abstraction for text generation.
//!
//! The [`Oracle`] trait decouples the loop from the model backend. The
//! shipped backend pipes the prompt into a configured command and reads the
//! reply from stdout. Tests use scripted oracles that return predetermined
//! replies without spawning processes.

use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::io::config::OracleConfig;
use crate::io::process::run_command_with_timeout;

/// Text generation backend.
pub trait Oracle {
    fn generate(&self, prompt: &str) -> Result<String>;
}

#[derive(Debug, Error)]
pub enum OracleError {
    #[error("oracle command timed out after {0:?}")]
    TimedOut(Duration),
    #[error("oracle command failed with status {status:?}: {stderr}")]
    Failed { status: Option<i32>, stderr: String },
    #[error("oracle output is not valid UTF-8")]
    InvalidUtf8,
}

/// Oracle that runs an external command: prompt on stdin, reply on stdout.
#[derive(Debug, Clone)]
pub struct CommandOracle {
    command: Vec<String>,
    timeout: Duration,
    output_limit_bytes: usize,
}

impl CommandOracle {
    pub fn new(command: Vec<String>, timeout: Duration, output_limit_bytes: usize) -> Self {
        Self {
            command,
            timeout,
            output_limit_bytes,
        }
    }

    pub fn from_config(config: &OracleConfig) -> Self {
        Self::new(
            config.command.clone(),
            Duration::from_secs(config.timeout_secs),
            config.output_limit_bytes,
        )
    }
}

impl Oracle for CommandOracle {
    #[instrument(skip_all, fields(timeout_secs = self.timeout.as_secs(), prompt_bytes = prompt.len()))]
    fn generate(&self, prompt: &str) -> Result<String> {
        let (program, args) = self
            .command
            .split_first()
            .context("oracle command is empty")?;
        info!(program = %program, "invoking oracle");

        let mut cmd = Command::new(program);
        cmd.args(args);
        let output = run_command_with_timeout(
            cmd,
            Some(prompt.as_bytes()),
            self.timeout,
            self.output_limit_bytes,
        )
        .context("run oracle command")?;

        if output.timed_out {
            warn!(timeout_secs = self.timeout.as_secs(), "oracle timed out");
            return Err(OracleError::TimedOut(self.timeout).into());
        }
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
            warn!(exit_code = ?output.status.code(), "oracle command failed");
            return Err(OracleError::Failed {
                status: output.status.code(),
                stderr,
            }
            .into());
        }
        if output.stdout_truncated > 0 {
            warn!(
                dropped = output.stdout_truncated,
                "oracle reply exceeded output limit"
            );
        }

        let reply = String::from_utf8(output.stdout).map_err(|_| OracleError::InvalidUtf8)?;
        debug!(reply_bytes = reply.len(), "oracle replied");
        Ok(reply)
    }
}
