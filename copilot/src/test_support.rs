//! Test doubles for driving the loop without processes or network.

use std::collections::VecDeque;
use std::path::Path;
use std::sync::Mutex;
use std::time::Duration;

use anyhow::{Result, anyhow};
use tempfile::TempDir;

use crate::io::lookup::{Lookup, LookupResponse, LookupResult};
use crate::io::oracle::Oracle;
use crate::io::sandbox::{ExecutionResult, Sandbox};
use crate::io::session::{SessionPaths, create_session};

/// Oracle that replays queued replies and records every prompt it receives.
#[derive(Debug, Default)]
pub struct ScriptedOracle {
    replies: Mutex<VecDeque<Result<String, String>>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedOracle {
    pub fn new(replies: Vec<&str>) -> Self {
        Self::with_replies(replies.into_iter().map(|r| Ok(r.to_string())).collect())
    }

    /// `Err` entries make the corresponding call fail with that message.
    pub fn with_replies(replies: Vec<Result<String, String>>) -> Self {
        Self {
            replies: Mutex::new(replies.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().expect("prompts lock").clone()
    }

    pub fn calls(&self) -> usize {
        self.prompts.lock().expect("prompts lock").len()
    }

    pub fn assert_drained(&self) {
        let remaining = self.replies.lock().expect("replies lock").len();
        assert_eq!(remaining, 0, "scripted oracle has {remaining} unused replies");
    }
}

impl Oracle for ScriptedOracle {
    fn generate(&self, prompt: &str) -> Result<String> {
        self.prompts
            .lock()
            .expect("prompts lock")
            .push(prompt.to_string());
        let next = self.replies.lock().expect("replies lock").pop_front();
        match next {
            Some(Ok(reply)) => Ok(reply),
            Some(Err(message)) => Err(anyhow!(message)),
            None => Err(anyhow!("scripted oracle exhausted")),
        }
    }
}

/// Sandbox that replays queued results and records the code it was given.
#[derive(Debug, Default)]
pub struct ScriptedSandbox {
    results: Mutex<VecDeque<ExecutionResult>>,
    executed: Mutex<Vec<String>>,
}

impl ScriptedSandbox {
    pub fn new(results: Vec<ExecutionResult>) -> Self {
        Self {
            results: Mutex::new(results.into()),
            executed: Mutex::new(Vec::new()),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn executed(&self) -> Vec<String> {
        self.executed.lock().expect("executed lock").clone()
    }
}

impl Sandbox for ScriptedSandbox {
    fn run(&self, code: &str, _timeout: Duration) -> ExecutionResult {
        self.executed
            .lock()
            .expect("executed lock")
            .push(code.to_string());
        self.results
            .lock()
            .expect("results lock")
            .pop_front()
            .unwrap_or_else(|| ExecutionResult::failed("scripted sandbox exhausted"))
    }
}

/// Lookup that answers every query with the same results.
#[derive(Debug, Default)]
pub struct ScriptedLookup {
    results: Vec<LookupResult>,
    queries: Mutex<Vec<String>>,
}

impl ScriptedLookup {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_titles(titles: &[&str]) -> Self {
        let results = titles
            .iter()
            .enumerate()
            .map(|(i, title)| LookupResult {
                title: (*title).to_string(),
                link: format!("https://example.test/{i}"),
                snippet: format!("about {title}"),
            })
            .collect();
        Self {
            results,
            queries: Mutex::new(Vec::new()),
        }
    }

    pub fn queries(&self) -> Vec<String> {
        self.queries.lock().expect("queries lock").clone()
    }
}

impl Lookup for ScriptedLookup {
    fn query(&self, text: &str, max_results: usize) -> LookupResponse {
        self.queries
            .lock()
            .expect("queries lock")
            .push(text.to_string());
        let results = self.results.iter().take(max_results).cloned().collect();
        LookupResponse::found(text, results)
    }
}

/// A freshly bootstrapped session in a temporary storage root.
pub struct TestSession {
    temp: TempDir,
    paths: SessionPaths,
}

impl TestSession {
    pub fn new() -> Result<Self> {
        let temp = tempfile::tempdir()?;
        let paths = create_session(temp.path())?;
        Ok(Self { temp, paths })
    }

    pub fn storage_root(&self) -> &Path {
        self.temp.path()
    }

    pub fn paths(&self) -> &SessionPaths {
        &self.paths
    }
}
