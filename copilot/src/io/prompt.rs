//! Prompt rendering for oracle calls.

use anyhow::{Context, Result};
use minijinja::{Environment, context};
use serde::Serialize;
use serde_json::Value;

use crate::io::context::ContextDocument;
use crate::io::session::DATASETS_PLACEHOLDER;

const DECISION_TEMPLATE: &str = include_str!("prompts/decision.md");
const INSIGHT_TEMPLATE: &str = include_str!("prompts/insight.md");
const SUMMARY_TEMPLATE: &str = include_str!("prompts/summary.md");
const CHAT_TEMPLATE: &str = include_str!("prompts/chat.md");

/// Inputs for the per-step decision prompt.
#[derive(Debug, Clone)]
pub struct DecisionInputs<'a> {
    pub goal: &'a str,
    pub context: &'a ContextDocument,
    pub metadata: &'a Value,
    pub previous_output: &'a str,
    pub completed_steps: u32,
    pub max_loops: u32,
    /// Script language named to the oracle, derived from the script extension.
    pub language: &'a str,
}

/// Inputs for the exhaustion summary prompt.
#[derive(Debug, Clone)]
pub struct SummaryInputs<'a> {
    pub goal: &'a str,
    pub context: &'a ContextDocument,
    pub metadata: &'a Value,
    pub last_output: &'a str,
}

/// Inputs for the chat message prompt.
#[derive(Debug, Clone)]
pub struct ChatInputs<'a, T: Serialize> {
    pub context: &'a ContextDocument,
    pub metadata: &'a Value,
    pub recent_history: &'a [T],
    pub message: &'a str,
}

/// Template engine wrapper around minijinja.
pub struct PromptEngine {
    env: Environment<'static>,
}

impl Default for PromptEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl PromptEngine {
    pub fn new() -> Self {
        let mut env = Environment::new();
        env.add_template("decision", DECISION_TEMPLATE)
            .expect("decision template should be valid");
        env.add_template("insight", INSIGHT_TEMPLATE)
            .expect("insight template should be valid");
        env.add_template("summary", SUMMARY_TEMPLATE)
            .expect("summary template should be valid");
        env.add_template("chat", CHAT_TEMPLATE)
            .expect("chat template should be valid");
        Self { env }
    }

    pub fn render_decision(&self, input: &DecisionInputs<'_>) -> Result<String> {
        let template = self.env.get_template("decision")?;
        let rendered = template.render(context! {
            goal => input.goal.trim(),
            context => pretty_json(input.context)?,
            metadata => pretty_json(input.metadata)?,
            previous_output => input.previous_output.trim(),
            completed_steps => input.completed_steps,
            max_loops => input.max_loops,
            language => input.language,
            datasets_placeholder => DATASETS_PLACEHOLDER,
        })?;
        Ok(rendered)
    }

    pub fn render_insight(&self, code: &str, stdout: &str, stderr: &str) -> Result<String> {
        let template = self.env.get_template("insight")?;
        let rendered = template.render(context! {
            code => code.trim_end(),
            stdout => stdout.trim_end(),
            stderr => stderr.trim_end(),
        })?;
        Ok(rendered)
    }

    pub fn render_summary(&self, input: &SummaryInputs<'_>) -> Result<String> {
        let template = self.env.get_template("summary")?;
        let rendered = template.render(context! {
            goal => input.goal.trim(),
            context => pretty_json(input.context)?,
            metadata => pretty_json(input.metadata)?,
            last_output => input.last_output.trim(),
        })?;
        Ok(rendered)
    }

    pub fn render_chat<T: Serialize>(&self, input: &ChatInputs<'_, T>) -> Result<String> {
        let template = self.env.get_template("chat")?;
        let rendered = template.render(context! {
            context => pretty_json(input.context)?,
            metadata => pretty_json(input.metadata)?,
            history => pretty_json(&input.recent_history)?,
            message => input.message.trim(),
        })?;
        Ok(rendered)
    }
}

/// Human name of the script language for a file extension.
pub fn language_for_extension(extension: &str) -> &str {
    match extension {
        "py" => "Python",
        "r" | "R" => "R",
        "sh" => "shell",
        "js" => "JavaScript",
        other => other,
    }
}

fn pretty_json<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    serde_json::to_string_pretty(value).context("serialize prompt context")
}
