//! In-process fakes for every external collaborator, each counting its calls.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use rag_context_engine::config::Config;
use rag_context_engine::core::models::{ScopeHints, Topic};
use rag_context_engine::core::store::{
    InMemoryVectorStore, ScoredRecord, VectorFilter, VectorRecord, VectorStore,
};
use rag_context_engine::core::EngineError;
use rag_context_engine::embedding::EmbeddingProvider;
use rag_context_engine::llm::{ChatMessage, DeltaReceiver, GenerationModel, GenerationParams};
use rag_context_engine::services::{Components, Services};
use rag_context_engine::topics::InMemoryTopicStore;
use rag_context_engine::web::{WebSearchOptions, WebSearchProvider, WebSearchResult};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

// ─── Embedding ──────────────────────────────────────────────────────

/// Every text embeds to the same unit vector, so cosine similarity against
/// a stored `[1, 0]` record is exactly 1.
pub struct FakeEmbedding {
    pub calls: AtomicUsize,
    pub fail: bool,
    pub delay: Option<Duration>,
}

impl FakeEmbedding {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: false,
            delay: None,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: true,
            delay: None,
        })
    }

    /// Answers only after `delay`, then fails transiently so the client
    /// keeps retrying.
    pub fn stalled(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicUsize::new(0),
            fail: false,
            delay: Some(delay),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbedding {
    fn model_name(&self) -> &str {
        "fake-embedding"
    }

    fn dims(&self) -> usize {
        2
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
            return Err(EngineError::embedding_transient("503 service unavailable"));
        }
        if self.fail {
            return Err(EngineError::embedding_terminal("401 unauthorized"));
        }
        Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
    }
}

// ─── Vector store ───────────────────────────────────────────────────

/// Returns preset similarities for whichever of its records match the filter.
pub struct FakeVectorStore {
    pub records: Vec<ScoredRecord>,
    pub calls: AtomicUsize,
    pub delay: Option<Duration>,
}

impl FakeVectorStore {
    pub fn new(records: Vec<ScoredRecord>) -> Arc<Self> {
        Arc::new(Self {
            records,
            calls: AtomicUsize::new(0),
            delay: None,
        })
    }

    pub fn slow(records: Vec<ScoredRecord>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            records,
            calls: AtomicUsize::new(0),
            delay: Some(delay),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl VectorStore for FakeVectorStore {
    async fn upsert(&self, _records: Vec<VectorRecord>) -> Result<()> {
        Ok(())
    }

    async fn query(&self, _vector: &[f32], filter: &VectorFilter, top_k: usize) -> Result<Vec<ScoredRecord>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(self
            .records
            .iter()
            .filter(|r| filter.matches(&r.record))
            .take(top_k)
            .cloned()
            .collect())
    }

    async fn delete_by_filter(&self, _filter: &VectorFilter) -> Result<usize> {
        Ok(0)
    }
}

pub fn record(user_id: &str, document_id: &str, text: &str) -> VectorRecord {
    VectorRecord {
        id: format!("{}:0", document_id),
        user_id: user_id.to_string(),
        topic_id: None,
        document_id: document_id.to_string(),
        chunk_index: 0,
        title: format!("{} title", document_id),
        text: text.to_string(),
        estimated_token_count: text.len().div_ceil(4),
        values: vec![1.0, 0.0],
    }
}

pub fn scored(user_id: &str, document_id: &str, text: &str, similarity: f32) -> ScoredRecord {
    ScoredRecord {
        record: record(user_id, document_id, text),
        similarity,
    }
}

// ─── Web search ─────────────────────────────────────────────────────

pub struct FakeWeb {
    pub results: Vec<WebSearchResult>,
    pub calls: AtomicUsize,
    pub fail: bool,
    pub delay: Option<Duration>,
    pub queries: Mutex<Vec<String>>,
}

impl FakeWeb {
    pub fn new(results: Vec<WebSearchResult>) -> Arc<Self> {
        Arc::new(Self {
            results,
            calls: AtomicUsize::new(0),
            fail: false,
            delay: None,
            queries: Mutex::new(Vec::new()),
        })
    }

    pub fn slow(results: Vec<WebSearchResult>, delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            results,
            calls: AtomicUsize::new(0),
            fail: false,
            delay: Some(delay),
            queries: Mutex::new(Vec::new()),
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            results: Vec::new(),
            calls: AtomicUsize::new(0),
            fail: true,
            delay: None,
            queries: Mutex::new(Vec::new()),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl WebSearchProvider for FakeWeb {
    fn name(&self) -> &str {
        "fake-web"
    }

    async fn search(&self, query: &str, _options: &WebSearchOptions) -> Result<Vec<WebSearchResult>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.queries.lock().unwrap().push(query.to_string());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            anyhow::bail!("429 rate limited");
        }
        Ok(self.results.clone())
    }
}

pub fn web_result(url: &str, title: &str, snippet: &str, score: f64) -> WebSearchResult {
    WebSearchResult {
        title: title.to_string(),
        url: url.to_string(),
        snippet: snippet.to_string(),
        published_date: None,
        score: Some(score),
    }
}

// ─── Generation model ───────────────────────────────────────────────

/// Scripted chat model. The scope check, the answer and the follow-up call
/// are told apart by their system prompts.
pub struct FakeModel {
    pub scope_reply: Result<String, EngineError>,
    pub answer: Result<String, EngineError>,
    pub follow_ups: Result<String, EngineError>,
    /// Stream deltas; the answer text is their concatenation.
    pub deltas: Vec<String>,
    /// After sending the deltas, keep the stream open until cancelled.
    pub hang: bool,
    pub scope_calls: AtomicUsize,
    pub answer_calls: AtomicUsize,
    pub follow_up_calls: AtomicUsize,
    pub stream_calls: AtomicUsize,
    pub prompts: Mutex<Vec<Vec<ChatMessage>>>,
    /// Set once a hanging stream observed its cancellation token.
    pub stream_cancelled: Arc<AtomicBool>,
}

impl FakeModel {
    pub fn answering(answer: &str) -> Self {
        Self {
            scope_reply: Ok("YES".to_string()),
            answer: Ok(answer.to_string()),
            follow_ups: Ok("1. First follow-up?\n2. Second follow-up?".to_string()),
            deltas: vec![answer.to_string()],
            hang: false,
            scope_calls: AtomicUsize::new(0),
            answer_calls: AtomicUsize::new(0),
            follow_up_calls: AtomicUsize::new(0),
            stream_calls: AtomicUsize::new(0),
            prompts: Mutex::new(Vec::new()),
            stream_cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_scope_reply(mut self, reply: Result<&str, EngineError>) -> Self {
        self.scope_reply = reply.map(str::to_string);
        self
    }

    pub fn with_deltas(mut self, deltas: &[&str]) -> Self {
        self.deltas = deltas.iter().map(|d| d.to_string()).collect();
        self.answer = Ok(deltas.concat());
        self
    }

    pub fn with_answer_error(mut self, error: EngineError) -> Self {
        self.answer = Err(error);
        self
    }

    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn scope_calls(&self) -> usize {
        self.scope_calls.load(Ordering::SeqCst)
    }

    pub fn answer_calls(&self) -> usize {
        self.answer_calls.load(Ordering::SeqCst) + self.stream_calls.load(Ordering::SeqCst)
    }

    pub fn follow_up_calls(&self) -> usize {
        self.follow_up_calls.load(Ordering::SeqCst)
    }

    /// System prompt of the most recent answer call.
    pub fn last_answer_prompt(&self) -> Option<String> {
        self.prompts
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|m| is_answer_prompt(m))
            .map(|m| m[0].content.clone())
    }
}

fn is_scope_prompt(messages: &[ChatMessage]) -> bool {
    messages[0].content.starts_with("You classify")
}

fn is_follow_up_prompt(messages: &[ChatMessage]) -> bool {
    messages[0].content.starts_with("Suggest")
}

fn is_answer_prompt(messages: &[ChatMessage]) -> bool {
    !is_scope_prompt(messages) && !is_follow_up_prompt(messages)
}

#[async_trait]
impl GenerationModel for FakeModel {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        _params: GenerationParams,
    ) -> Result<String, EngineError> {
        self.prompts.lock().unwrap().push(messages.to_vec());
        if is_scope_prompt(messages) {
            self.scope_calls.fetch_add(1, Ordering::SeqCst);
            self.scope_reply.clone()
        } else if is_follow_up_prompt(messages) {
            self.follow_up_calls.fetch_add(1, Ordering::SeqCst);
            self.follow_ups.clone()
        } else {
            self.answer_calls.fetch_add(1, Ordering::SeqCst);
            self.answer.clone()
        }
    }

    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        _params: GenerationParams,
        cancel: CancellationToken,
    ) -> Result<DeltaReceiver, EngineError> {
        self.stream_calls.fetch_add(1, Ordering::SeqCst);
        self.prompts.lock().unwrap().push(messages);
        if let Err(e) = &self.answer {
            return Err(e.clone());
        }

        let (tx, rx) = mpsc::channel(8);
        let deltas = self.deltas.clone();
        let hang = self.hang;
        let cancelled = self.stream_cancelled.clone();
        tokio::spawn(async move {
            for delta in deltas {
                if tx.send(Ok(delta)).await.is_err() {
                    return;
                }
            }
            if hang {
                cancel.cancelled().await;
                cancelled.store(true, Ordering::SeqCst);
            }
        });
        Ok(rx)
    }
}

// ─── Wiring ─────────────────────────────────────────────────────────

pub fn bank_of_uganda() -> Topic {
    Topic {
        id: "bou".to_string(),
        name: "Bank of Uganda".to_string(),
        description: Some("Uganda's central bank and its monetary policy".to_string()),
        strict: true,
        hints: ScopeHints::default(),
    }
}

pub struct Harness {
    pub services: Services,
    pub embedding: Arc<FakeEmbedding>,
    pub web: Arc<FakeWeb>,
    pub model: Arc<FakeModel>,
}

pub struct HarnessBuilder {
    pub config: Config,
    pub store: Arc<dyn VectorStore>,
    pub embedding: Arc<FakeEmbedding>,
    pub web: Option<Arc<FakeWeb>>,
    pub model: FakeModel,
    pub topics: Vec<Topic>,
}

impl HarnessBuilder {
    pub fn new(model: FakeModel) -> Self {
        let mut config = Config::default();
        config.generation.follow_up_questions = 2;
        Self {
            config,
            store: Arc::new(InMemoryVectorStore::new()),
            embedding: FakeEmbedding::new(),
            web: None,
            model,
            topics: vec![bank_of_uganda()],
        }
    }

    pub fn store(mut self, store: Arc<dyn VectorStore>) -> Self {
        self.store = store;
        self
    }

    pub fn embedding(mut self, embedding: Arc<FakeEmbedding>) -> Self {
        self.embedding = embedding;
        self
    }

    pub fn web(mut self, web: Arc<FakeWeb>) -> Self {
        self.web = Some(web);
        self
    }

    pub fn config(mut self, f: impl FnOnce(&mut Config)) -> Self {
        f(&mut self.config);
        self
    }

    pub fn build(self) -> Harness {
        let model = Arc::new(self.model);
        let web = self.web.unwrap_or_else(|| FakeWeb::new(Vec::new()));
        let components = Components {
            store: self.store,
            embedding: Some(self.embedding.clone()),
            web: Some(web.clone()),
            model: model.clone(),
            topics: Arc::new(InMemoryTopicStore::new(self.topics)),
        };
        Harness {
            services: Services::new(&self.config, components),
            embedding: self.embedding,
            web,
            model,
        }
    }
}
