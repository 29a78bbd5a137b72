//! TOML configuration parsing and validation.
//!
//! Every section is optional; missing sections and fields fall back to the
//! defaults below. API keys are never read from the file: the embedding and
//! generation clients use `OPENAI_API_KEY` and the web provider uses
//! `TAVILY_API_KEY`.
//!
//! ```toml
//! [retrieval]
//! min_score = 0.7
//! max_context_tokens = 6000
//!
//! [embedding]
//! provider = "openai"
//! model = "text-embedding-3-small"
//! dims = 1536
//!
//! [web]
//! provider = "tavily"
//!
//! [[topics]]
//! id = "bou"
//! name = "Bank of Uganda"
//! strict = true
//! keywords = ["monetary policy", "central bank rate"]
//! ```

use anyhow::{bail, Context, Result};
use rag_context_core::chunk::{DEFAULT_OVERLAP_TOKENS, DEFAULT_TARGET_TOKENS};
use rag_context_core::models::Topic;
use serde::Deserialize;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Largest batch any supported embedding provider accepts in one call.
pub const MAX_EMBEDDING_BATCH: usize = 100;

/// One week.
pub const MAX_CACHE_TTL_SECS: u64 = 7 * 24 * 3600;

#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Config {
    pub chunking: ChunkingConfig,
    pub retrieval: RetrievalConfig,
    pub embedding: EmbeddingConfig,
    pub web: WebConfig,
    pub generation: GenerationConfig,
    pub stream: StreamConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
    pub topics: Vec<Topic>,
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ChunkingConfig {
    pub target_tokens: usize,
    pub overlap_tokens: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_tokens: DEFAULT_TARGET_TOKENS,
            overlap_tokens: DEFAULT_OVERLAP_TOKENS,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct RetrievalConfig {
    /// Results scoring below this are dropped before merging.
    pub min_score: f64,
    pub max_document_chunks: usize,
    pub max_web_results: usize,
    pub max_context_tokens: usize,
    pub vector_timeout_ms: u64,
    pub web_timeout_ms: u64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            min_score: 0.7,
            max_document_chunks: 8,
            max_web_results: 5,
            max_context_tokens: 6000,
            vector_timeout_ms: 5000,
            web_timeout_ms: 8000,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// `disabled`, `openai` or `ollama`.
    pub provider: String,
    pub model: Option<String>,
    pub dims: Option<usize>,
    /// Base URL. Defaults to the provider's public or local endpoint.
    pub url: Option<String>,
    pub batch_size: usize,
    pub max_retries: u32,
    pub retry_base_delay_ms: u64,
    pub timeout_secs: u64,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            url: None,
            batch_size: MAX_EMBEDDING_BATCH,
            max_retries: 3,
            retry_base_delay_ms: 500,
            timeout_secs: 30,
        }
    }
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct WebConfig {
    /// `disabled` or `tavily`.
    pub provider: String,
    pub url: Option<String>,
    pub cache_ttl_secs: u64,
    pub cache_max_entries: usize,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            url: None,
            cache_ttl_secs: 3600,
            cache_max_entries: 1000,
        }
    }
}

impl WebConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct GenerationConfig {
    /// Only `openai` (any OpenAI-compatible chat completions endpoint).
    pub provider: String,
    pub url: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    /// Token cap for the YES/NO scope classification call.
    pub scope_max_tokens: u32,
    /// Number of follow-up suggestions requested after an answer. 0 disables.
    pub follow_up_questions: usize,
    pub timeout_secs: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            url: "https://api.openai.com".to_string(),
            model: "gpt-4o-mini".to_string(),
            temperature: 0.3,
            max_tokens: 1024,
            scope_max_tokens: 3,
            follow_up_questions: 3,
            timeout_secs: 60,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct StreamConfig {
    /// Capacity of the bounded event channel handed to streaming callers.
    pub buffer: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self { buffer: 64 }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ServerConfig {
    pub bind: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1:7341".to_string(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive; `RUST_LOG` wins when set.
    pub level: String,
    /// When set, logs are also written to a daily-rolling file here.
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            log_dir: None,
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

pub fn validate(config: &Config) -> Result<()> {
    // Chunking
    if config.chunking.target_tokens == 0 {
        bail!("chunking.target_tokens must be > 0");
    }
    if config.chunking.overlap_tokens >= config.chunking.target_tokens {
        bail!("chunking.overlap_tokens must be < chunking.target_tokens");
    }

    // Retrieval
    if !(0.0..=1.0).contains(&config.retrieval.min_score) {
        bail!("retrieval.min_score must be in [0.0, 1.0]");
    }
    if config.retrieval.max_context_tokens == 0 {
        bail!("retrieval.max_context_tokens must be > 0");
    }

    // Embedding
    let embedding = &config.embedding;
    match embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" => {}
        other => bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, or ollama.",
            other
        ),
    }
    if embedding.batch_size == 0 || embedding.batch_size > MAX_EMBEDDING_BATCH {
        bail!("embedding.batch_size must be in 1..={}", MAX_EMBEDDING_BATCH);
    }
    if embedding.is_enabled() {
        if embedding.dims.is_none() || embedding.dims == Some(0) {
            bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                embedding.provider
            );
        }
        if embedding.model.is_none() {
            bail!(
                "embedding.model must be specified when provider is '{}'",
                embedding.provider
            );
        }
    }

    // Web
    match config.web.provider.as_str() {
        "disabled" | "tavily" => {}
        other => bail!(
            "Unknown web provider: '{}'. Must be disabled or tavily.",
            other
        ),
    }

    if config.web.cache_ttl_secs == 0 || config.web.cache_ttl_secs > MAX_CACHE_TTL_SECS {
        bail!("web.cache_ttl_secs must be in 1..={}", MAX_CACHE_TTL_SECS);
    }
    if config.web.cache_max_entries == 0 {
        bail!("web.cache_max_entries must be > 0");
    }

    // Generation
    if config.generation.provider != "openai" {
        bail!(
            "Unknown generation provider: '{}'. Must be openai.",
            config.generation.provider
        );
    }

    if config.stream.buffer == 0 {
        bail!("stream.buffer must be > 0");
    }

    let mut seen = HashSet::new();
    for topic in &config.topics {
        if !seen.insert(topic.id.as_str()) {
            bail!("duplicate topic id: '{}'", topic.id);
        }
    }

    Ok(())
}
