//! The CoTAS orchestration loop (Think, Act, Search, Done).
//!
//! Each iteration asks the oracle for the next [`Decision`], applies its
//! context update, dispatches the action and appends exactly one record to the
//! step log. Every record is persisted before the matching progress event is
//! emitted, so a consumer that goes away never leaves the log half-written.
//!
//! Terminal states:
//! - `DONE`: the oracle declared the goal satisfied.
//! - `ERROR`: the decision could not be obtained or parsed, or named an
//!   unknown action.
//! - `EXHAUSTED`: the iteration bound was reached.
//!
//! Each one finalizes the log once with a reason and emits a `complete` event.

use std::time::Duration;

use anyhow::Result;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::core::decision::{DecisionParseError, parse_decision};
use crate::core::events::ProgressEvent;
use crate::core::truncate::truncate_with_marker;
use crate::core::types::{Action, Decision, LoopState};
use crate::io::artifacts::{file_name, save_result, save_script, write_final_insight};
use crate::io::config::CopilotConfig;
use crate::io::context::{ContextEntry, append_entry, read_context};
use crate::io::lookup::{Lookup, format_results};
use crate::io::metadata::read_metadata;
use crate::io::oracle::Oracle;
use crate::io::prompt::{DecisionInputs, PromptEngine, SummaryInputs, language_for_extension};
use crate::io::sandbox::{ExecutionResult, Sandbox};
use crate::io::session::SessionPaths;
use crate::io::step_log::{
    ActRecord, StepBody, StepRecord, append_step, begin_step_log, finalize_step_log,
    load_step_log,
};

pub const REASON_DONE: &str = "goal satisfied";
pub const REASON_EXHAUSTED: &str = "max loops reached";
const INSIGHT_FALLBACK: &str = "Execution completed";
const RESPONSE_EXCERPT_CHARS: usize = 500;

/// Knobs for one run of the loop.
#[derive(Debug, Clone)]
pub struct LoopConfig {
    pub max_loops: u32,
    pub sandbox_timeout: Duration,
    pub script_extension: String,
    /// Cap on stdout/stderr embedded in ACT records.
    pub record_output_limit_bytes: usize,
    pub search_max_results: usize,
    pub summarize_on_exhaustion: bool,
}

impl LoopConfig {
    pub fn from_config(config: &CopilotConfig) -> Self {
        Self {
            max_loops: config.max_loops,
            sandbox_timeout: config.sandbox.timeout(),
            script_extension: config.sandbox.script_extension.clone(),
            record_output_limit_bytes: config.sandbox.record_output_limit_bytes,
            search_max_results: config.search.max_results,
            summarize_on_exhaustion: config.summarize_on_exhaustion,
        }
    }
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self::from_config(&CopilotConfig::default())
    }
}

#[derive(Debug, Clone)]
pub struct RunRequest {
    pub goal: String,
    /// Continue an unfinalized step log instead of starting over.
    pub resume: bool,
}

/// How a run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunOutcome {
    /// `Running` only when the run was abandoned by its consumer.
    pub state: LoopState,
    /// Number of the last recorded step.
    pub steps_taken: u32,
    pub reason: Option<String>,
    pub final_insight: Option<String>,
    /// The progress consumer disconnected; the log is left resumable.
    pub abandoned: bool,
}

/// The progress consumer went away.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("progress consumer disconnected")]
pub struct Disconnected;

/// Receives progress events in step order.
pub trait ProgressSink {
    fn emit(&mut self, event: ProgressEvent) -> Result<(), Disconnected>;
}

impl ProgressSink for Vec<ProgressEvent> {
    fn emit(&mut self, event: ProgressEvent) -> Result<(), Disconnected> {
        self.push(event);
        Ok(())
    }
}

/// Failures that end a run in the `ERROR` state.
#[derive(Debug, Error)]
pub enum StepError {
    #[error("render decision prompt: {0:#}")]
    Prompt(anyhow::Error),
    #[error("oracle call failed: {0:#}")]
    Oracle(anyhow::Error),
    #[error("Failed to parse decision: {source}\nResponse: {excerpt}")]
    Parse {
        source: DecisionParseError,
        excerpt: String,
    },
    #[error("unknown action: {0}")]
    UnknownAction(String),
}

/// Run the loop for a session until it reaches a terminal state or the
/// consumer disconnects.
///
/// Only store I/O failures are returned as errors; every other failure is
/// recorded in the step log.
#[instrument(skip_all, fields(session = %paths.session_id, max_loops = config.max_loops, resume = request.resume))]
pub fn run_cotas<O, S, L, P>(
    paths: &SessionPaths,
    oracle: &O,
    sandbox: &S,
    lookup: &L,
    config: &LoopConfig,
    request: &RunRequest,
    sink: &mut P,
) -> Result<RunOutcome>
where
    O: Oracle + ?Sized,
    S: Sandbox + ?Sized,
    L: Lookup + ?Sized,
    P: ProgressSink + ?Sized,
{
    let mut run = Run {
        paths,
        oracle,
        sandbox,
        lookup,
        config,
        prompts: PromptEngine::new(),
        sink,
        connected: true,
    };
    run.execute(request)
}

struct Run<'a, O: ?Sized, S: ?Sized, L: ?Sized, P: ?Sized> {
    paths: &'a SessionPaths,
    oracle: &'a O,
    sandbox: &'a S,
    lookup: &'a L,
    config: &'a LoopConfig,
    prompts: PromptEngine,
    sink: &'a mut P,
    connected: bool,
}

/// Where the loop picks up: the last recorded step and the output it produced.
struct Checkpoint {
    goal: String,
    step: u32,
    last_output: String,
}

impl<O, S, L, P> Run<'_, O, S, L, P>
where
    O: Oracle + ?Sized,
    S: Sandbox + ?Sized,
    L: Lookup + ?Sized,
    P: ProgressSink + ?Sized,
{
    fn execute(&mut self, request: &RunRequest) -> Result<RunOutcome> {
        let Checkpoint {
            goal,
            mut step,
            mut last_output,
        } = self.checkpoint(request)?;

        info!(goal = %goal, from_step = step, "starting run");
        self.emit(ProgressEvent::Start {
            step,
            goal: goal.clone(),
            max_loops: self.config.max_loops,
        });

        while step < self.config.max_loops {
            if !self.connected {
                return Ok(self.abandoned(step));
            }
            step += 1;
            debug!(step, "deciding next action");

            let decision = match self.decide(&goal, step, &last_output) {
                Ok(decision) => decision,
                Err(err) => return self.fail(&goal, step, &err, None),
            };

            let context_updated = self.apply_context_update(step, &decision)?;

            match &decision.action {
                Action::Think => {
                    self.record(&goal, step, StepBody::Think {
                        content: decision.content.clone(),
                    }, &decision)?;
                    self.emit(ProgressEvent::Think {
                        step,
                        content: decision.content.clone(),
                        context_updated,
                    });
                    last_output = decision.content;
                }
                Action::Act => {
                    self.emit(ProgressEvent::ActStart { step });
                    let (act, execution) = self.act(step, &decision.content);
                    let insight = act.insight.clone();
                    self.record(&goal, step, StepBody::Act(act), &decision)?;
                    self.emit(ProgressEvent::ActComplete {
                        step,
                        stdout: execution.stdout,
                        stderr: execution.stderr,
                        insight: insight.clone(),
                        context_updated,
                    });
                    last_output = insight;
                }
                Action::Search => {
                    self.emit(ProgressEvent::SearchStart {
                        step,
                        query: decision.content.clone(),
                    });
                    let response = self
                        .lookup
                        .query(&decision.content, self.config.search_max_results);
                    if let Some(error) = &response.error {
                        warn!(step, error = %error, "lookup failed");
                    }
                    let result = format_results(&response);
                    self.record(&goal, step, StepBody::Search {
                        query: decision.content.clone(),
                        result: result.clone(),
                    }, &decision)?;
                    self.emit(ProgressEvent::SearchComplete {
                        step,
                        result: result.clone(),
                        context_updated,
                    });
                    last_output = result;
                }
                Action::Done => return self.finish(&goal, step, &decision),
                Action::Unrecognized(tag) => {
                    let err = StepError::UnknownAction(tag.clone());
                    return self.fail(&goal, step, &err, decision.context_update.clone());
                }
            }
        }

        if !self.connected {
            return Ok(self.abandoned(step));
        }
        self.exhaust(&goal, step, &last_output)
    }

    fn checkpoint(&self, request: &RunRequest) -> Result<Checkpoint> {
        let log_path = &self.paths.step_log_path;
        if request.resume {
            match load_step_log(log_path)? {
                Some(log) if log.is_finalized() => {
                    return Err(anyhow::anyhow!(
                        "step log {} is finalized; nothing to resume",
                        log_path.display()
                    ));
                }
                Some(log) => {
                    if !request.goal.is_empty() && request.goal != log.goal {
                        warn!(stored = %log.goal, "resuming with the stored goal");
                    }
                    let last_output = log
                        .steps
                        .iter()
                        .rev()
                        .find_map(StepRecord::output)
                        .map_or_else(|| initial_output(&log.goal), str::to_string);
                    return Ok(Checkpoint {
                        step: log.last_step(),
                        last_output,
                        goal: log.goal,
                    });
                }
                None => info!("no step log to resume, starting fresh"),
            }
        }
        begin_step_log(log_path, &request.goal)?;
        Ok(Checkpoint {
            goal: request.goal.clone(),
            step: 0,
            last_output: initial_output(&request.goal),
        })
    }

    fn decide(&self, goal: &str, step: u32, last_output: &str) -> Result<Decision, StepError> {
        let context = read_context(&self.paths.context_path);
        let metadata = read_metadata(&self.paths.dataset_metadata_path);
        let prompt = self
            .prompts
            .render_decision(&DecisionInputs {
                goal,
                context: &context,
                metadata: &metadata,
                previous_output: last_output,
                completed_steps: step - 1,
                max_loops: self.config.max_loops,
                language: language_for_extension(&self.config.script_extension),
            })
            .map_err(StepError::Prompt)?;
        let raw = self.oracle.generate(&prompt).map_err(StepError::Oracle)?;
        parse_decision(&raw).map_err(|source| StepError::Parse {
            source,
            excerpt: raw.trim().chars().take(RESPONSE_EXCERPT_CHARS).collect(),
        })
    }

    fn apply_context_update(&self, step: u32, decision: &Decision) -> Result<bool> {
        let Some(update) = &decision.context_update else {
            return Ok(false);
        };
        append_entry(
            &self.paths.context_path,
            ContextEntry::now(update.clone(), format!("step {step}")),
        )?;
        debug!(step, "context updated");
        Ok(true)
    }

    /// Save, execute and interpret one ACT step. Failures land in the record.
    fn act(&self, step: u32, code: &str) -> (ActRecord, ExecutionResult) {
        let mut errors = Vec::new();

        let script = match save_script(self.paths, step, &self.config.script_extension, code) {
            Ok(path) => file_name(&path),
            Err(err) => {
                warn!(step, err = %format!("{err:#}"), "could not save script");
                errors.push(format!("save script: {err:#}"));
                None
            }
        };

        let runnable = self.paths.materialize_dataset_paths(code);
        let execution = self.sandbox.run(&runnable, self.config.sandbox_timeout);

        let result = match save_result(self.paths, step, &execution) {
            Ok(path) => file_name(&path),
            Err(err) => {
                warn!(step, err = %format!("{err:#}"), "could not save result");
                errors.push(format!("save result: {err:#}"));
                None
            }
        };

        let insight = self.insight(code, &execution);
        let limit = self.config.record_output_limit_bytes;
        let record = ActRecord {
            script,
            result,
            stdout: truncate_with_marker(&execution.stdout, limit),
            stderr: truncate_with_marker(&execution.stderr, limit),
            exit_code: execution.exit_code,
            timed_out: execution.timed_out,
            insight,
            error: (!errors.is_empty()).then(|| errors.join("; ")),
        };
        (record, execution)
    }

    fn insight(&self, code: &str, execution: &ExecutionResult) -> String {
        let generated = self
            .prompts
            .render_insight(code, &execution.stdout, &execution.stderr)
            .and_then(|prompt| self.oracle.generate(&prompt));
        match generated {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => fallback_insight(execution),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "insight generation failed, using raw output");
                fallback_insight(execution)
            }
        }
    }

    fn record(&self, goal: &str, step: u32, body: StepBody, decision: &Decision) -> Result<()> {
        append_step(
            &self.paths.step_log_path,
            goal,
            StepRecord::new(step, body, decision.context_update.clone()),
        )?;
        Ok(())
    }

    fn finish(&mut self, goal: &str, step: u32, decision: &Decision) -> Result<RunOutcome> {
        let final_insight = decision.content.clone();
        write_final_insight(&self.paths.final_insight_path, &final_insight)?;
        self.record(goal, step, StepBody::Done {
            final_insight: final_insight.clone(),
        }, decision)?;
        finalize_step_log(&self.paths.step_log_path, true, Some(REASON_DONE))?;
        info!(step, "goal satisfied");

        self.emit(ProgressEvent::Done {
            step,
            final_insight: final_insight.clone(),
        });
        Ok(self.complete(step, LoopState::Done, REASON_DONE, Some(final_insight)))
    }

    /// `context_update` is whatever was already applied to the context document this step.
    fn fail(
        &mut self,
        goal: &str,
        step: u32,
        err: &StepError,
        context_update: Option<String>,
    ) -> Result<RunOutcome> {
        let message = err.to_string();
        warn!(step, error = %message, "run failed");
        append_step(
            &self.paths.step_log_path,
            goal,
            StepRecord::new(step, StepBody::Error {
                error: message.clone(),
            }, context_update),
        )?;
        finalize_step_log(&self.paths.step_log_path, false, Some(&message))?;

        self.emit(ProgressEvent::Error {
            step,
            message: message.clone(),
        });
        Ok(self.complete(step, LoopState::Error, &message, None))
    }

    fn exhaust(&mut self, goal: &str, step: u32, last_output: &str) -> Result<RunOutcome> {
        let final_insight = if self.config.summarize_on_exhaustion {
            let summary = self.summarize(goal, last_output);
            write_final_insight(&self.paths.final_insight_path, &summary)?;
            Some(summary)
        } else {
            None
        };
        finalize_step_log(&self.paths.step_log_path, false, Some(REASON_EXHAUSTED))?;
        info!(step, "iteration bound reached");
        Ok(self.complete(step, LoopState::Exhausted, REASON_EXHAUSTED, final_insight))
    }

    fn summarize(&self, goal: &str, last_output: &str) -> String {
        let context = read_context(&self.paths.context_path);
        let metadata = read_metadata(&self.paths.dataset_metadata_path);
        let generated = self
            .prompts
            .render_summary(&SummaryInputs {
                goal,
                context: &context,
                metadata: &metadata,
                last_output,
            })
            .and_then(|prompt| self.oracle.generate(&prompt));
        match generated {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            Ok(_) => last_output.to_string(),
            Err(err) => {
                warn!(err = %format!("{err:#}"), "summary generation failed, using last output");
                last_output.to_string()
            }
        }
    }

    fn complete(
        &mut self,
        step: u32,
        state: LoopState,
        reason: &str,
        final_insight: Option<String>,
    ) -> RunOutcome {
        self.emit(ProgressEvent::Complete {
            total_steps: step,
            state,
            reason: Some(reason.to_string()),
        });
        RunOutcome {
            state,
            steps_taken: step,
            reason: Some(reason.to_string()),
            final_insight,
            abandoned: false,
        }
    }

    fn abandoned(&self, step: u32) -> RunOutcome {
        info!(step, "consumer disconnected, leaving log resumable");
        RunOutcome {
            state: LoopState::Running,
            steps_taken: step,
            reason: None,
            final_insight: None,
            abandoned: true,
        }
    }

    fn emit(&mut self, event: ProgressEvent) {
        if !self.connected {
            return;
        }
        if self.sink.emit(event).is_err() {
            debug!("progress sink disconnected");
            self.connected = false;
        }
    }
}

fn initial_output(goal: &str) -> String {
    format!("User Goal: {goal}")
}

fn fallback_insight(execution: &ExecutionResult) -> String {
    [&execution.stdout, &execution.stderr]
        .into_iter()
        .map(|text| text.trim())
        .find(|text| !text.is_empty())
        .unwrap_or(INSIGHT_FALLBACK)
        .to_string()
}
