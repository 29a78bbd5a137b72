//! Web search retrieval.
//!
//! [`WebRetriever`] wraps a [`WebSearchProvider`] with a result cache, topic
//! and date post-filters and normalization into [`RetrievedItem`]s.
//! Provider-specific shapes never leave this module.
//!
//! # Pipeline
//!
//! 1. Look up the normalized request in the shared cache. A hit returns
//!    immediately without calling the provider.
//! 2. Prefix the query with the topic name when the query does not already
//!    mention it.
//! 3. Call the provider under the web timeout. Failures are logged and
//!    yield an empty result; they are never cached.
//! 4. Normalize: `id = url`, provider score clamped to `[0, 1]` or a
//!    rank-decay score `1 - rank/(n+1)` when the provider gives none.
//! 5. Drop results whose title and snippet mention no topic keyword.
//! 6. Drop results outside the requested date window. Undated results are
//!    kept unless an explicit start or end date was requested.
//! 7. Keep the first `max_results` and cache them.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, Utc};
use rag_context_core::cache::TtlCache;
use rag_context_core::chunk::estimate_tokens;
use rag_context_core::models::RetrievedItem;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::WebConfig;

const RETRIEVER: &str = "web";
const TAVILY_DEFAULT_URL: &str = "https://api.tavily.com";
/// Upper bound on results requested from the provider per call.
const MAX_PROVIDER_RESULTS: usize = 20;

const STOP_WORDS: &[&str] = &[
    "the", "and", "for", "with", "about", "from", "into", "over", "under", "that", "this",
    "what", "which", "are", "was", "were", "its", "their", "our", "your",
];

/// Shared cache of normalized web results.
pub type WebCache = TtlCache<Vec<RetrievedItem>>;

/// Relative recency window for web results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeRange {
    Day,
    Week,
    Month,
    Year,
}

impl TimeRange {
    pub fn as_str(&self) -> &'static str {
        match self {
            TimeRange::Day => "day",
            TimeRange::Week => "week",
            TimeRange::Month => "month",
            TimeRange::Year => "year",
        }
    }

    pub fn days(&self) -> u64 {
        match self {
            TimeRange::Day => 1,
            TimeRange::Week => 7,
            TimeRange::Month => 30,
            TimeRange::Year => 365,
        }
    }
}

impl fmt::Display for TimeRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TimeRange {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "day" => Ok(TimeRange::Day),
            "week" => Ok(TimeRange::Week),
            "month" => Ok(TimeRange::Month),
            "year" => Ok(TimeRange::Year),
            other => Err(format!(
                "invalid time range '{}': expected day, week, month or year",
                other
            )),
        }
    }
}

/// Caller-facing web search filters.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WebFilter {
    /// Topic name, used to steer the query and as a keyword backstop.
    pub topic: Option<String>,
    pub time_range: Option<TimeRange>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub country: Option<String>,
}

impl WebFilter {
    fn summary(&self) -> String {
        format!(
            "topic={} range={} start={} end={} country={}",
            self.topic.as_deref().unwrap_or("-"),
            self.time_range.map_or("-", |r| r.as_str()),
            self.start_date.map_or_else(|| "-".to_string(), |d| d.to_string()),
            self.end_date.map_or_else(|| "-".to_string(), |d| d.to_string()),
            self.country.as_deref().unwrap_or("-"),
        )
    }
}

/// Options passed through to a provider.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WebSearchOptions {
    pub time_range: Option<TimeRange>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub country: Option<String>,
    pub max_results: usize,
}

/// A raw provider result before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct WebSearchResult {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub published_date: Option<String>,
    pub score: Option<f64>,
}

/// A web search backend.
#[async_trait]
pub trait WebSearchProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: &str, options: &WebSearchOptions) -> Result<Vec<WebSearchResult>>;
}

/// Build the configured provider, or `None` when web search is disabled.
pub fn create_provider(config: &WebConfig, timeout: Duration) -> Result<Option<Arc<dyn WebSearchProvider>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "tavily" => Ok(Some(Arc::new(TavilyProvider::from_env(
            config.url.as_deref(),
            timeout,
        )?))),
        other => bail!("Unknown web provider: {}", other),
    }
}

// ============ Retriever ============

pub struct WebRetriever {
    provider: Arc<dyn WebSearchProvider>,
    cache: Arc<WebCache>,
    ttl: Duration,
    timeout: Duration,
}

impl WebRetriever {
    pub fn new(
        provider: Arc<dyn WebSearchProvider>,
        cache: Arc<WebCache>,
        ttl: Duration,
        timeout: Duration,
    ) -> Self {
        Self {
            provider,
            cache,
            ttl,
            timeout,
        }
    }

    pub fn cache(&self) -> &Arc<WebCache> {
        &self.cache
    }

    /// Search the web. Never fails: provider errors and timeouts are logged
    /// and produce an empty list.
    pub async fn search(&self, query: &str, filter: &WebFilter, max_results: usize) -> Vec<RetrievedItem> {
        if max_results == 0 || query.trim().is_empty() {
            return Vec::new();
        }

        let key = cache_key(query, filter, max_results);
        if let Some(items) = self.cache.get(&key) {
            debug!(component = RETRIEVER, hits = items.len(), "web cache hit");
            return items;
        }

        let provider_query = build_query(query, filter.topic.as_deref());
        let options = WebSearchOptions {
            time_range: filter.time_range,
            start_date: filter.start_date,
            end_date: filter.end_date,
            country: filter.country.clone(),
            max_results: (max_results * 2).clamp(1, MAX_PROVIDER_RESULTS),
        };

        let raw = match tokio::time::timeout(
            self.timeout,
            self.provider.search(&provider_query, &options),
        )
        .await
        {
            Ok(Ok(raw)) => raw,
            Ok(Err(e)) => {
                warn!(
                    component = RETRIEVER,
                    provider = self.provider.name(),
                    filter = %filter.summary(),
                    error = %e,
                    "web search failed, continuing without web results"
                );
                return Vec::new();
            }
            Err(_) => {
                warn!(
                    component = RETRIEVER,
                    provider = self.provider.name(),
                    filter = %filter.summary(),
                    "web search timed out after {:?}, continuing without web results",
                    self.timeout
                );
                return Vec::new();
            }
        };

        let returned = raw.len();
        let items = filter_results(raw, filter, Utc::now().date_naive(), max_results);
        debug!(
            component = RETRIEVER,
            filter = %filter.summary(),
            returned,
            kept = items.len(),
            "web search complete"
        );
        self.cache.set(key, items.clone(), self.ttl);
        items
    }
}

/// Normalize, post-filter and truncate raw provider results.
fn filter_results(
    raw: Vec<WebSearchResult>,
    filter: &WebFilter,
    today: NaiveDate,
    max_results: usize,
) -> Vec<RetrievedItem> {
    let tokens = filter.topic.as_deref().map(topic_tokens).unwrap_or_default();
    let window = DateWindow::from_filter(filter, today);
    let n = raw.len();
    let mut seen = HashSet::new();

    raw.into_iter()
        .enumerate()
        .filter(|(_, r)| !r.url.is_empty() && seen.insert(r.url.clone()))
        .filter(|(_, r)| mentions_topic(r, &tokens))
        .filter(|(_, r)| {
            window
                .as_ref()
                .map_or(true, |w| w.admits(extract_date(r.published_date.as_deref(), &r.snippet)))
        })
        .map(|(rank, r)| normalize(r, rank, n))
        .take(max_results)
        .collect()
}

fn normalize(result: WebSearchResult, rank: usize, total: usize) -> RetrievedItem {
    let score = result
        .score
        .unwrap_or_else(|| 1.0 - rank as f64 / (total + 1) as f64);
    let tokens = estimate_tokens(&result.title) + estimate_tokens(&result.url) + estimate_tokens(&result.snippet);
    RetrievedItem::web(result.url, result.title, result.snippet, score, tokens)
}

/// Normalized cache key over every field that changes the result.
fn cache_key(query: &str, filter: &WebFilter, max_results: usize) -> String {
    fn norm(s: &str) -> String {
        s.split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase()
    }
    format!(
        "q={}|topic={}|range={}|start={}|end={}|country={}|max={}",
        norm(query),
        filter.topic.as_deref().map(norm).unwrap_or_default(),
        filter.time_range.map_or("", |r| r.as_str()),
        filter.start_date.map(|d| d.to_string()).unwrap_or_default(),
        filter.end_date.map(|d| d.to_string()).unwrap_or_default(),
        filter.country.as_deref().map(norm).unwrap_or_default(),
        max_results
    )
}

/// Prefix `query` with `topic` unless it already mentions it.
fn build_query(query: &str, topic: Option<&str>) -> String {
    let query = query.trim();
    match topic.map(str::trim).filter(|t| !t.is_empty()) {
        Some(topic) if !query.to_lowercase().contains(&topic.to_lowercase()) => {
            format!("{} {}", topic, query)
        }
        _ => query.to_string(),
    }
}

/// Lowercase alphanumeric words of at least 3 chars, minus stop words.
fn topic_tokens(topic: &str) -> Vec<String> {
    let mut tokens: Vec<String> = topic
        .split(|c: char| !c.is_alphanumeric())
        .map(str::to_lowercase)
        .filter(|w| w.chars().count() >= 3 && !STOP_WORDS.contains(&w.as_str()))
        .collect();
    tokens.dedup();
    tokens
}

fn mentions_topic(result: &WebSearchResult, tokens: &[String]) -> bool {
    if tokens.is_empty() {
        return true;
    }
    let haystack = format!("{} {}", result.title, result.snippet).to_lowercase();
    tokens.iter().any(|t| haystack.contains(t.as_str()))
}

/// Best-effort publication date: the provider field first, then the first
/// `YYYY-MM-DD` in the snippet.
fn extract_date(published: Option<&str>, snippet: &str) -> Option<NaiveDate> {
    published
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .and_then(parse_date)
        .or_else(|| {
            static ISO_DATE: OnceLock<Option<Regex>> = OnceLock::new();
            ISO_DATE
                .get_or_init(|| Regex::new(r"\b(\d{4}-\d{2}-\d{2})\b").ok())
                .as_ref()?
                .captures_iter(snippet)
                .find_map(|c| NaiveDate::parse_from_str(&c[1], "%Y-%m-%d").ok())
        })
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.date_naive())
        .or_else(|_| DateTime::parse_from_rfc2822(s).map(|d| d.date_naive()))
        .ok()
        .or_else(|| NaiveDate::parse_from_str(s.get(..10)?, "%Y-%m-%d").ok())
}

#[derive(Debug, Clone, PartialEq)]
struct DateWindow {
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
    /// Explicit dates were requested: undated results are dropped.
    strict: bool,
}

impl DateWindow {
    fn from_filter(filter: &WebFilter, today: NaiveDate) -> Option<Self> {
        if filter.start_date.is_some() || filter.end_date.is_some() {
            return Some(Self {
                start: filter.start_date,
                end: filter.end_date,
                strict: true,
            });
        }
        filter.time_range.map(|range| Self {
            start: today.checked_sub_days(Days::new(range.days())),
            end: None,
            strict: false,
        })
    }

    fn admits(&self, date: Option<NaiveDate>) -> bool {
        match date {
            None => !self.strict,
            Some(d) => self.start.map_or(true, |s| d >= s) && self.end.map_or(true, |e| d <= e),
        }
    }
}

// ============ Tavily Provider ============

/// [Tavily](https://tavily.com/) search API. Requires `TAVILY_API_KEY`.
pub struct TavilyProvider {
    client: reqwest::Client,
    url: String,
    api_key: String,
}

impl TavilyProvider {
    pub fn new(api_key: impl Into<String>, url: Option<&str>, timeout: Duration) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            url: url
                .unwrap_or(TAVILY_DEFAULT_URL)
                .trim_end_matches('/')
                .to_string(),
            api_key: api_key.into(),
        })
    }

    pub fn from_env(url: Option<&str>, timeout: Duration) -> Result<Self> {
        let api_key = std::env::var("TAVILY_API_KEY")
            .map_err(|_| anyhow::anyhow!("TAVILY_API_KEY environment variable not set"))?;
        Self::new(api_key, url, timeout)
    }
}

#[derive(Debug, Serialize)]
struct TavilyRequest<'a> {
    query: &'a str,
    max_results: usize,
    search_depth: &'static str,
    topic: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    time_range: Option<&'static str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    start_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    end_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    country: Option<&'a str>,
}

#[derive(Debug, Deserialize)]
struct TavilyResponse {
    #[serde(default)]
    results: Vec<TavilyResult>,
}

#[derive(Debug, Deserialize)]
struct TavilyResult {
    #[serde(default)]
    title: String,
    url: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    score: Option<f64>,
    #[serde(default)]
    published_date: Option<String>,
}

#[async_trait]
impl WebSearchProvider for TavilyProvider {
    fn name(&self) -> &str {
        "tavily"
    }

    async fn search(&self, query: &str, options: &WebSearchOptions) -> Result<Vec<WebSearchResult>> {
        let dated = options.time_range.is_some()
            || options.start_date.is_some()
            || options.end_date.is_some();
        let request = TavilyRequest {
            query,
            max_results: options.max_results,
            search_depth: "basic",
            topic: if dated { "news" } else { "general" },
            time_range: options.time_range.map(|r| r.as_str()),
            start_date: options.start_date.map(|d| d.to_string()),
            end_date: options.end_date.map(|d| d.to_string()),
            country: options.country.as_deref(),
        };

        let response = self
            .client
            .post(format!("{}/search", self.url))
            .bearer_auth(&self.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!("Tavily API error {}: {}", status, body);
        }

        let body: TavilyResponse = response.json().await?;
        Ok(body
            .results
            .into_iter()
            .map(|r| WebSearchResult {
                title: r.title,
                url: r.url,
                snippet: r.content,
                published_date: r.published_date,
                score: r.score,
            })
            .collect())
    }
}
