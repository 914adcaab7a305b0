//! Lookup service backing the SEARCH action.
//!
//! [`Lookup::query`] never fails; transport and credential problems are
//! reported in [`LookupResponse::error`] so the loop can record them and move
//! on.

use std::collections::HashMap;
use std::env;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::io::config::{SearchBackend, SearchConfig};
use crate::io::context::read_context;
use crate::io::session::SessionPaths;

pub const API_KEY_VAR: &str = "GOOGLE_SEARCH_API_KEY";
pub const ENGINE_ID_VAR: &str = "GOOGLE_SEARCH_ENGINE_ID";
/// Upper bound the Custom Search API accepts for `num`.
const MAX_RESULTS_PER_REQUEST: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupResult {
    pub title: String,
    pub link: String,
    pub snippet: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LookupResponse {
    pub query: String,
    pub results: Vec<LookupResult>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl LookupResponse {
    pub fn found(query: &str, results: Vec<LookupResult>) -> Self {
        Self {
            query: query.to_string(),
            results,
            error: None,
        }
    }

    pub fn failed(query: &str, error: impl Into<String>) -> Self {
        Self {
            query: query.to_string(),
            results: Vec::new(),
            error: Some(error.into()),
        }
    }
}

pub trait Lookup {
    fn query(&self, text: &str, max_results: usize) -> LookupResponse;
}

/// Render a response as the text handed to the next decision prompt.
pub fn format_results(response: &LookupResponse) -> String {
    if let Some(error) = &response.error {
        return format!("Search failed: {error}");
    }
    if response.results.is_empty() {
        return format!("No results found matching query: '{}'", response.query);
    }
    let mut out = format!("Search: {}\n\n", response.query);
    for (i, result) in response.results.iter().enumerate() {
        out.push_str(&format!(
            "{}. {}\n{}\n{}\n\n",
            i + 1,
            result.title,
            result.snippet,
            result.link
        ));
    }
    out
}

/// Build the configured lookup backend for a session.
pub fn lookup_from_config(
    config: &SearchConfig,
    paths: &SessionPaths,
) -> Result<Box<dyn Lookup + Send>> {
    match config.backend {
        SearchBackend::Context => Ok(Box::new(ContextLookup::new(paths.context_path.clone()))),
        SearchBackend::Web => Ok(Box::new(WebLookup::from_env(config)?)),
    }
}

/// Case-insensitive substring search over the session's context history.
#[derive(Debug, Clone)]
pub struct ContextLookup {
    context_path: PathBuf,
}

impl ContextLookup {
    pub fn new(context_path: PathBuf) -> Self {
        Self { context_path }
    }
}

impl Lookup for ContextLookup {
    #[instrument(skip_all, fields(backend = "context", max_results = max_results))]
    fn query(&self, text: &str, max_results: usize) -> LookupResponse {
        let needle = text.trim().to_lowercase();
        let doc = read_context(&self.context_path);
        let results: Vec<LookupResult> = doc
            .history
            .iter()
            .filter(|entry| entry.content.to_lowercase().contains(&needle))
            .take(max_results)
            .map(|entry| LookupResult {
                title: format!("[{}]", entry.source),
                link: format!("context.json@{}", entry.timestamp),
                snippet: entry.content.clone(),
            })
            .collect();
        debug!(matches = results.len(), "context lookup finished");
        LookupResponse::found(text, results)
    }
}

/// Google Custom Search JSON API with an in-memory TTL cache.
pub struct WebLookup {
    client: reqwest::blocking::Client,
    endpoint: String,
    credentials: Option<(String, String)>,
    cache: TtlCache,
}

impl WebLookup {
    pub fn new(
        endpoint: String,
        credentials: Option<(String, String)>,
        timeout: Duration,
        cache_ttl: Duration,
    ) -> Result<Self> {
        let client = reqwest::blocking::Client::builder()
            .timeout(timeout)
            .build()
            .context("build http client")?;
        Ok(Self {
            client,
            endpoint,
            credentials,
            cache: TtlCache::new(cache_ttl),
        })
    }

    /// Read credentials from the environment. Missing credentials are not an
    /// error here; each query reports them instead.
    pub fn from_env(config: &SearchConfig) -> Result<Self> {
        let credentials = match (env::var(API_KEY_VAR), env::var(ENGINE_ID_VAR)) {
            (Ok(key), Ok(cx)) if !key.is_empty() && !cx.is_empty() => Some((key, cx)),
            _ => {
                warn!("web lookup credentials are not set");
                None
            }
        };
        Self::new(
            config.endpoint.clone(),
            credentials,
            Duration::from_secs(config.timeout_secs),
            Duration::from_secs(config.cache_ttl_secs),
        )
    }

    fn request(&self, text: &str, max_results: usize) -> Result<reqwest::blocking::Request> {
        let (key, cx) = self
            .credentials
            .as_ref()
            .ok_or_else(|| anyhow!("{API_KEY_VAR} and {ENGINE_ID_VAR} must be set"))?;
        let num = max_results.clamp(1, MAX_RESULTS_PER_REQUEST).to_string();
        self.client
            .get(&self.endpoint)
            .query(&[
                ("key", key.as_str()),
                ("cx", cx.as_str()),
                ("q", text),
                ("num", num.as_str()),
            ])
            .build()
            .context("build search request")
    }

    fn fetch(&self, text: &str, max_results: usize) -> Result<Vec<LookupResult>> {
        let request = self.request(text, max_results)?;
        let response = self
            .client
            .execute(request)
            .context("send search request")?
            .error_for_status()
            .context("search request rejected")?;
        let body: SearchApiResponse = response.json().context("decode search response")?;
        Ok(body.into_results(max_results))
    }
}

impl Lookup for WebLookup {
    #[instrument(skip_all, fields(backend = "web", max_results = max_results))]
    fn query(&self, text: &str, max_results: usize) -> LookupResponse {
        let key = format!("{text}:{max_results}");
        if let Some(hit) = self.cache.get(&key) {
            debug!("search cache hit");
            return hit;
        }
        match self.fetch(text, max_results) {
            Ok(results) => {
                info!(results = results.len(), "web lookup finished");
                let response = LookupResponse::found(text, results);
                self.cache.insert(key, response.clone());
                response
            }
            Err(err) => {
                warn!(err = %format!("{err:#}"), "web lookup failed");
                LookupResponse::failed(text, format!("{err:#}"))
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
struct SearchApiResponse {
    #[serde(default)]
    items: Vec<SearchApiItem>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct SearchApiItem {
    title: String,
    link: String,
    snippet: String,
}

impl SearchApiResponse {
    fn into_results(self, max_results: usize) -> Vec<LookupResult> {
        self.items
            .into_iter()
            .take(max_results)
            .map(|item| LookupResult {
                title: item.title,
                link: item.link,
                snippet: item.snippet,
            })
            .collect()
    }
}

/// Successful responses only; failures are retried on the next query.
struct TtlCache {
    ttl: Duration,
    entries: Mutex<HashMap<String, (LookupResponse, Instant)>>,
}

impl TtlCache {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    fn get(&self, key: &str) -> Option<LookupResponse> {
        let mut entries = self.entries.lock().ok()?;
        match entries.get(key) {
            Some((response, stored)) if stored.elapsed() < self.ttl => Some(response.clone()),
            Some(_) => {
                entries.remove(key);
                None
            }
            None => None,
        }
    }

    fn insert(&self, key: String, response: LookupResponse) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(key, (response, Instant::now()));
        }
    }
}
