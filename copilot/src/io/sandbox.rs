//! Execution sandbox for oracle-generated code.
//!
//! A sandbox bounds resources (wall-clock timeout, captured-output cap). It is
//! not a security boundary: neither strategy restricts filesystem access, and
//! only the container strategy drops network access.
//!
//! [`Sandbox::run`] never returns an error. Spawn and I/O failures are folded
//! into the result's `stderr` so the loop can always produce a step record.

use std::io::Write;
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{info, instrument, warn};

use crate::core::truncate::capped_text;
use crate::io::config::{SandboxConfig, SandboxStrategy};
use crate::io::process::{CommandOutput, run_command_with_timeout};

/// Captured result of one execution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionResult {
    pub stdout: String,
    pub stderr: String,
    /// Exit code, or `None` if the process was killed or never started.
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

impl ExecutionResult {
    /// A result for code that never ran.
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: message.into(),
            exit_code: None,
            timed_out: false,
        }
    }

    fn expired(timeout: Duration) -> Self {
        Self {
            stdout: String::new(),
            stderr: format!("Execution timed out after {}s", timeout.as_secs_f64()),
            exit_code: None,
            timed_out: true,
        }
    }

    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Isolation strategy for running a code snippet.
pub trait Sandbox {
    fn run(&self, code: &str, timeout: Duration) -> ExecutionResult;
}

/// Build the configured sandbox strategy.
pub fn sandbox_from_config(config: &SandboxConfig) -> Box<dyn Sandbox + Send> {
    match config.strategy {
        SandboxStrategy::Process => Box::new(ProcessSandbox::new(
            config.interpreter.clone(),
            config.script_extension.clone(),
            config.output_limit_bytes,
        )),
        SandboxStrategy::Container => Box::new(ContainerSandbox::new(
            config.container_runtime.clone(),
            config.container_image.clone(),
            config.container_interpreter.clone(),
            config.output_limit_bytes,
        )),
    }
}

/// Writes the code to a temporary script and runs it with a local interpreter.
#[derive(Debug, Clone)]
pub struct ProcessSandbox {
    interpreter: Vec<String>,
    extension: String,
    output_limit_bytes: usize,
}

impl ProcessSandbox {
    pub fn new(interpreter: Vec<String>, extension: String, output_limit_bytes: usize) -> Self {
        Self {
            interpreter,
            extension,
            output_limit_bytes,
        }
    }

    fn execute(&self, code: &str, timeout: Duration) -> Result<ExecutionResult> {
        let mut script = tempfile::Builder::new()
            .prefix("cotas-")
            .suffix(&format!(".{}", self.extension))
            .tempfile()
            .context("create temp script")?;
        script
            .write_all(code.as_bytes())
            .context("write temp script")?;
        script.flush().context("flush temp script")?;

        let (program, args) = self
            .interpreter
            .split_first()
            .context("sandbox interpreter is empty")?;
        let mut cmd = Command::new(program);
        cmd.args(args).arg(script.path());

        let output = run_command_with_timeout(cmd, None, timeout, self.output_limit_bytes)?;
        // `script` is removed when dropped, after the child has exited.
        Ok(into_result(output, timeout, self.output_limit_bytes))
    }
}

impl Sandbox for ProcessSandbox {
    #[instrument(skip_all, fields(strategy = "process", timeout_secs = timeout.as_secs()))]
    fn run(&self, code: &str, timeout: Duration) -> ExecutionResult {
        match self.execute(code, timeout) {
            Ok(result) => {
                info!(exit_code = ?result.exit_code, timed_out = result.timed_out, "sandbox run finished");
                result
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "sandbox run failed");
                ExecutionResult::failed(format!("Execution failed: {err:#}"))
            }
        }
    }
}

/// Pipes the code into an interpreter inside a throwaway container with no network.
#[derive(Debug, Clone)]
pub struct ContainerSandbox {
    runtime: String,
    image: String,
    interpreter: Vec<String>,
    output_limit_bytes: usize,
}

impl ContainerSandbox {
    pub fn new(
        runtime: String,
        image: String,
        interpreter: Vec<String>,
        output_limit_bytes: usize,
    ) -> Self {
        Self {
            runtime,
            image,
            interpreter,
            output_limit_bytes,
        }
    }

    fn command(&self) -> Command {
        let mut cmd = Command::new(&self.runtime);
        cmd.args(["run", "--rm", "-i", "--network", "none"])
            .arg(&self.image)
            .args(&self.interpreter);
        cmd
    }
}

impl Sandbox for ContainerSandbox {
    #[instrument(skip_all, fields(strategy = "container", image = %self.image, timeout_secs = timeout.as_secs()))]
    fn run(&self, code: &str, timeout: Duration) -> ExecutionResult {
        match run_command_with_timeout(
            self.command(),
            Some(code.as_bytes()),
            timeout,
            self.output_limit_bytes,
        ) {
            Ok(output) => into_result(output, timeout, self.output_limit_bytes),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "container run failed");
                ExecutionResult::failed(format!("Execution failed: {err:#}"))
            }
        }
    }
}

fn into_result(output: CommandOutput, timeout: Duration, limit: usize) -> ExecutionResult {
    if output.timed_out {
        return ExecutionResult::expired(timeout);
    }
    ExecutionResult {
        stdout: capped_text(&output.stdout, output.stdout_truncated, limit),
        stderr: capped_text(&output.stderr, output.stderr_truncated, limit),
        exit_code: output.status.code(),
        timed_out: false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::truncate::TRUNCATION_MARKER;
    use std::time::Instant;

    fn shell_sandbox(limit: usize) -> ProcessSandbox {
        ProcessSandbox::new(vec!["sh".to_string()], "sh".to_string(), limit)
    }

    #[test]
    fn captures_output_and_exit_code() {
        let result = shell_sandbox(1024).run("echo hello; echo oops >&2", Duration::from_secs(5));
        assert_eq!(result.stdout, "hello\n");
        assert_eq!(result.stderr, "oops\n");
        assert!(result.success());
        assert!(!result.timed_out);
    }

    #[test]
    fn failing_code_reports_stderr() {
        let result =
            shell_sandbox(1024).run("echo 'boom' >&2; exit 1", Duration::from_secs(5));
        assert_eq!(result.exit_code, Some(1));
        assert!(result.stderr.contains("boom"));
    }

    #[test]
    fn oversized_output_is_truncated_with_marker() {
        let limit = 100;
        let result = shell_sandbox(limit).run(
            "i=0; while [ $i -lt 500 ]; do printf 'x'; i=$((i+1)); done",
            Duration::from_secs(5),
        );
        assert_eq!(result.stdout.len(), limit + TRUNCATION_MARKER.len());
        assert!(result.stdout.ends_with(TRUNCATION_MARKER));
    }

    #[test]
    fn timeout_returns_promptly_with_empty_stdout() {
        let timeout = Duration::from_millis(500);
        let start = Instant::now();
        let result = shell_sandbox(1024).run("echo started; sleep 5", timeout);
        assert!(start.elapsed() < timeout + Duration::from_secs(2));
        assert!(result.timed_out);
        assert!(result.stdout.is_empty());
        assert!(result.stderr.contains("timed out"));
        assert_eq!(result.exit_code, None);
    }

    #[test]
    fn missing_interpreter_is_reported_not_raised() {
        let sandbox = ProcessSandbox::new(
            vec!["/no/such/interpreter".to_string()],
            "py".to_string(),
            1024,
        );
        let result = sandbox.run("print(1)", Duration::from_secs(1));
        assert!(result.stdout.is_empty());
        assert!(result.stderr.starts_with("Execution failed"));
        assert_eq!(result.exit_code, None);
    }

    #[test]
    fn container_timeout_holds_when_runtime_ignores_stdin() {
        use std::os::unix::fs::PermissionsExt;

        let temp = tempfile::tempdir().expect("tempdir");
        let runtime = temp.path().join("stalled-runtime");
        std::fs::write(&runtime, "#!/bin/sh\nexec sleep 5\n").expect("write runtime");
        std::fs::set_permissions(&runtime, std::fs::Permissions::from_mode(0o755))
            .expect("chmod runtime");
        let sandbox = ContainerSandbox::new(
            runtime.to_string_lossy().into_owned(),
            "python:3.12-slim".to_string(),
            vec!["python".to_string(), "-".to_string()],
            1024,
        );

        let timeout = Duration::from_millis(300);
        let start = Instant::now();
        let result = sandbox.run(&"x".repeat(1 << 20), timeout);
        assert!(start.elapsed() < timeout + Duration::from_secs(2));
        assert!(result.timed_out);
        assert!(result.stdout.is_empty());
        assert!(result.stderr.contains("timed out"));
    }

    #[test]
    fn container_command_disables_network() {
        let sandbox = ContainerSandbox::new(
            "docker".to_string(),
            "python:3.12-slim".to_string(),
            vec!["python".to_string(), "-".to_string()],
            1024,
        );
        let cmd = sandbox.command();
        let args: Vec<String> = cmd
            .get_args()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();
        assert_eq!(cmd.get_program(), "docker");
        assert_eq!(
            args,
            vec!["run", "--rm", "-i", "--network", "none", "python:3.12-slim", "python", "-"]
        );
    }
}
