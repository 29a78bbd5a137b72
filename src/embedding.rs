//! Embedding providers and the batching/retry client.
//!
//! An [`EmbeddingProvider`] makes exactly one HTTP call per
//! [`embed_batch`](EmbeddingProvider::embed_batch) and classifies failures as
//! retryable or terminal. [`EmbeddingClient`] sits in front of it, splits
//! the input into provider-sized batches, retries transient failures and
//! reassembles the vectors in input order.
//!
//! # Retry Strategy
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Malformed response bodies → fail immediately
//! - Backoff: `retry_base_delay_ms × 2^(attempt-1)`, at most `max_retries` retries

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;
use rag_context_core::models::EmbeddingVector;
use rag_context_core::EngineError;
use tracing::{debug, warn};

use crate::config::{EmbeddingConfig, MAX_EMBEDDING_BATCH};

const OPENAI_DEFAULT_URL: &str = "https://api.openai.com";
const OLLAMA_DEFAULT_URL: &str = "http://localhost:11434";

/// A remote embedding model.
#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    fn model_name(&self) -> &str;

    /// Returns the embedding vector dimensionality, or 0 if unknown.
    fn dims(&self) -> usize;

    /// Largest batch accepted in one call.
    fn max_batch_size(&self) -> usize {
        MAX_EMBEDDING_BATCH
    }

    /// Embed one batch in a single request. Errors must be
    /// [`EngineError::EmbeddingProvider`] with `retryable` set correctly.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError>;
}

/// Build the configured provider, or `None` when embeddings are disabled.
///
/// # Errors
///
/// Returns an error for unknown providers, missing `model`/`dims`, or a
/// missing `OPENAI_API_KEY` for the OpenAI provider.
pub fn create_provider(config: &EmbeddingConfig) -> Result<Option<Arc<dyn EmbeddingProvider>>> {
    match config.provider.as_str() {
        "disabled" => Ok(None),
        "openai" => Ok(Some(Arc::new(OpenAiEmbeddingProvider::new(config)?))),
        "ollama" => Ok(Some(Arc::new(OllamaEmbeddingProvider::new(config)?))),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Client ============

/// Batching, retrying front-end over an [`EmbeddingProvider`].
///
/// No caching: query embeddings are cheap next to retrieval and stay fresh.
pub struct EmbeddingClient {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    max_retries: u32,
    base_delay: Duration,
}

impl EmbeddingClient {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Self {
        Self::with_settings(
            provider,
            config.batch_size,
            config.max_retries,
            Duration::from_millis(config.retry_base_delay_ms),
        )
    }

    pub fn with_settings(
        provider: Arc<dyn EmbeddingProvider>,
        batch_size: usize,
        max_retries: u32,
        base_delay: Duration,
    ) -> Self {
        let batch_size = batch_size.clamp(1, provider.max_batch_size().max(1));
        Self {
            provider,
            batch_size,
            max_retries,
            base_delay,
        }
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    /// Embed `(owner_id, text)` pairs, returning one vector per pair in
    /// input order.
    pub async fn embed(&self, inputs: &[(String, String)]) -> Result<Vec<EmbeddingVector>, EngineError> {
        if inputs.is_empty() {
            return Ok(Vec::new());
        }

        let mut vectors = Vec::with_capacity(inputs.len());
        for batch in inputs.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|(_, text)| text.clone()).collect();
            let values = self.embed_with_retry(&texts).await?;
            if values.len() != batch.len() {
                return Err(EngineError::embedding_terminal(format!(
                    "provider returned {} vectors for {} inputs",
                    values.len(),
                    batch.len()
                )));
            }
            let expected = self.provider.dims();
            for ((owner_id, _), values) in batch.iter().zip(values) {
                if expected > 0 && values.len() != expected {
                    return Err(EngineError::embedding_terminal(format!(
                        "expected {}-dimensional vectors, got {}",
                        expected,
                        values.len()
                    )));
                }
                vectors.push(EmbeddingVector::new(owner_id.clone(), values));
            }
        }
        Ok(vectors)
    }

    /// Embed a single query string.
    pub async fn embed_query(&self, text: &str) -> Result<EmbeddingVector, EngineError> {
        self.embed(&[("query".to_string(), text.to_string())])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| EngineError::embedding_terminal("empty embedding response"))
    }

    async fn embed_with_retry(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError> {
        let mut attempt = 0;
        loop {
            match self.provider.embed_batch(texts).await {
                Ok(values) => return Ok(values),
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    let delay = self.base_delay * (1u32 << (attempt - 1).min(5));
                    warn!(
                        component = "embedding",
                        model = self.provider.model_name(),
                        attempt,
                        error = %e,
                        "transient embedding failure, retrying in {:?}",
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => {
                    debug!(component = "embedding", attempt, error = %e, "embedding failed");
                    return Err(e);
                }
            }
        }
    }
}

// ============ HTTP helpers ============

fn http_client(timeout_secs: u64) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?)
}

/// Send a JSON POST and classify the outcome per the retry strategy.
async fn post_json(
    request: reqwest::RequestBuilder,
    provider: &str,
) -> Result<serde_json::Value, EngineError> {
    let response = request
        .send()
        .await
        .map_err(|e| EngineError::embedding_transient(format!("{} request failed: {}", provider, e)))?;

    let status = response.status();
    if status.is_success() {
        return response.json().await.map_err(|e| {
            EngineError::embedding_terminal(format!("{} returned invalid JSON: {}", provider, e))
        });
    }

    let body_text = response.text().await.unwrap_or_default();
    let message = format!("{} API error {}: {}", provider, status, body_text);
    if status.as_u16() == 429 || status.is_server_error() {
        Err(EngineError::embedding_transient(message))
    } else {
        Err(EngineError::embedding_terminal(message))
    }
}

fn parse_vector(value: &serde_json::Value) -> Option<Vec<f32>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

// ============ OpenAI Provider ============

/// Calls `POST {url}/v1/embeddings`. Requires `OPENAI_API_KEY`.
pub struct OpenAiEmbeddingProvider {
    client: reqwest::Client,
    url: String,
    api_key: String,
    model: String,
    dims: usize,
}

impl OpenAiEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| OPENAI_DEFAULT_URL.to_string());

        Ok(Self {
            client: http_client(config.timeout_secs)?,
            url: url.trim_end_matches('/').to_string(),
            api_key,
            model,
            dims,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let request = self
            .client
            .post(format!("{}/v1/embeddings", self.url))
            .bearer_auth(&self.api_key)
            .json(&body);

        let json = post_json(request, "OpenAI").await?;
        parse_openai_response(&json)
    }
}

/// Extract `data[].embedding`, ordered by each item's `index` field.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EngineError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| EngineError::embedding_terminal("Invalid OpenAI response: missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map_or(position, |i| i as usize);
        let vector = item
            .get("embedding")
            .and_then(parse_vector)
            .ok_or_else(|| EngineError::embedding_terminal("Invalid OpenAI response: missing embedding"))?;
        indexed.push((index, vector));
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama Provider ============

/// Calls `POST {url}/api/embed` on a local Ollama instance.
pub struct OllamaEmbeddingProvider {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
}

impl OllamaEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| OLLAMA_DEFAULT_URL.to_string());

        Ok(Self {
            client: http_client(config.timeout_secs)?,
            url: url.trim_end_matches('/').to_string(),
            model,
            dims,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaEmbeddingProvider {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let request = self
            .client
            .post(format!("{}/api/embed", self.url))
            .json(&body);

        let json = post_json(request, "Ollama").await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EngineError> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| EngineError::embedding_terminal("Invalid Ollama response: missing embeddings array"))?
        .iter()
        .map(|e| {
            parse_vector(e).ok_or_else(|| {
                EngineError::embedding_terminal("Invalid Ollama response: embedding is not an array")
            })
        })
        .collect()
}
