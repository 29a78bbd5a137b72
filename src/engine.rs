//! The `Answer` pipeline.
//!
//! ```text
//! AnswerRequest
//!   └─ validate
//!   └─ TopicStore::get(topic_id)
//!   └─ ScopeGuard ──off-topic──▶ canned refusal + one follow-up
//!   └─ ContextAssembler (vector ∥ web, joined)
//!   └─ prompt ─▶ GenerationModel (complete | stream)
//!   └─ citation::resolve on the full answer
//!   └─ follow-up suggestions (best effort)
//! ```
//!
//! Every request carries a UUID `request_id` and runs inside an `answer`
//! span, so every absorbed failure logged below it can be traced back to
//! the request that degraded.

use std::sync::Arc;

use chrono::NaiveDate;
use rag_context_core::citation;
use rag_context_core::models::{Citation, RagContext, RetrievedItem, Topic};
use rag_context_core::EngineError;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{GenerationConfig, RetrievalConfig};
use crate::context::{ContextAssembler, ContextRequest};
use crate::llm::{ChatMessage, GenerationModel, GenerationParams};
use crate::prompt::{
    answer_messages, follow_up_messages, parse_follow_ups, refusal_follow_up, refusal_message,
};
use crate::scope::{ScopeGuard, ScopeState};
use crate::stream::{StreamAssembler, StreamEvent};
use crate::topics::TopicStore;
use crate::web::{TimeRange, WebFilter};

/// Token cap for the follow-up suggestion call.
const FOLLOW_UP_MAX_TOKENS: u32 = 256;

fn default_true() -> bool {
    true
}

/// One question plus its retrieval filters. Unset limits fall back to the
/// `[retrieval]` config.
#[derive(Debug, Clone, Deserialize)]
pub struct AnswerRequest {
    pub question: String,
    pub user_id: String,
    #[serde(default)]
    pub topic_id: Option<String>,
    #[serde(default)]
    pub document_ids: Option<Vec<String>>,
    #[serde(default)]
    pub time_range: Option<TimeRange>,
    #[serde(default)]
    pub start_date: Option<NaiveDate>,
    #[serde(default)]
    pub end_date: Option<NaiveDate>,
    #[serde(default)]
    pub country: Option<String>,
    #[serde(default = "default_true")]
    pub enable_document_search: bool,
    #[serde(default = "default_true")]
    pub enable_web_search: bool,
    #[serde(default)]
    pub max_document_chunks: Option<usize>,
    #[serde(default)]
    pub min_score: Option<f64>,
    #[serde(default)]
    pub max_web_results: Option<usize>,
}

impl AnswerRequest {
    pub fn new(question: impl Into<String>, user_id: impl Into<String>) -> Self {
        Self {
            question: question.into(),
            user_id: user_id.into(),
            topic_id: None,
            document_ids: None,
            time_range: None,
            start_date: None,
            end_date: None,
            country: None,
            enable_document_search: true,
            enable_web_search: true,
            max_document_chunks: None,
            min_score: None,
            max_web_results: None,
        }
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.question.trim().is_empty() {
            return Err(EngineError::InvalidRequest("question is empty".to_string()));
        }
        if self.user_id.trim().is_empty() {
            return Err(EngineError::InvalidRequest("user_id is empty".to_string()));
        }
        if let Some(min_score) = self.min_score {
            if !(0.0..=1.0).contains(&min_score) {
                return Err(EngineError::InvalidRequest(
                    "min_score must be in [0.0, 1.0]".to_string(),
                ));
            }
        }
        if let (Some(start), Some(end)) = (self.start_date, self.end_date) {
            if start > end {
                return Err(EngineError::InvalidRequest(format!(
                    "start_date {} is after end_date {}",
                    start, end
                )));
            }
        }
        Ok(())
    }
}

/// A complete answer. Also the payload of the streaming `Metadata` event,
/// where `answer` is the cleaned full text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnswerResponse {
    pub request_id: String,
    pub answer: String,
    pub sources: Vec<RetrievedItem>,
    pub citations: Vec<Citation>,
    pub follow_up_questions: Vec<String>,
    pub refusal: bool,
    pub truncated: bool,
}

impl AnswerResponse {
    fn refusal(request_id: &str, topic_name: &str) -> Self {
        Self {
            request_id: request_id.to_string(),
            answer: refusal_message(topic_name),
            sources: Vec::new(),
            citations: Vec::new(),
            follow_up_questions: vec![refusal_follow_up(topic_name)],
            refusal: true,
            truncated: false,
        }
    }
}

/// What the pipeline decided before generation.
enum Plan {
    Refuse { topic_name: String },
    Generate {
        context: RagContext,
        messages: Vec<ChatMessage>,
    },
}

pub struct RagEngine {
    topics: Arc<dyn TopicStore>,
    scope: ScopeGuard,
    assembler: ContextAssembler,
    model: Arc<dyn GenerationModel>,
    retrieval: RetrievalConfig,
    generation: GenerationConfig,
    stream_buffer: usize,
}

impl RagEngine {
    pub fn new(
        topics: Arc<dyn TopicStore>,
        model: Arc<dyn GenerationModel>,
        assembler: ContextAssembler,
        retrieval: RetrievalConfig,
        generation: GenerationConfig,
        stream_buffer: usize,
    ) -> Self {
        Self {
            topics,
            scope: ScopeGuard::new(model.clone(), generation.scope_max_tokens),
            assembler,
            model,
            retrieval,
            generation,
            stream_buffer,
        }
    }

    /// Answer one question and return the full response.
    ///
    /// # Errors
    ///
    /// Fails only on an invalid request, cancellation, a fatal embedding
    /// failure (explicit documents with web search off) or a generation
    /// failure. Everything else degrades.
    pub async fn answer(
        &self,
        req: AnswerRequest,
        cancel: CancellationToken,
    ) -> Result<AnswerResponse, EngineError> {
        req.validate()?;
        let request_id = Uuid::new_v4().to_string();
        let span = answer_span(&request_id, &req);
        self.answer_inner(&request_id, &req, &cancel)
            .instrument(span)
            .await
    }

    async fn answer_inner(
        &self,
        request_id: &str,
        req: &AnswerRequest,
        cancel: &CancellationToken,
    ) -> Result<AnswerResponse, EngineError> {
        let (context, messages) = match self.plan(req, cancel).await? {
            Plan::Refuse { topic_name } => return Ok(AnswerResponse::refusal(request_id, &topic_name)),
            Plan::Generate { context, messages } => (context, messages),
        };

        let raw = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            raw = self.model.complete(&messages, self.answer_params()) => raw?,
        };

        Ok(self.finalize(request_id, req, &raw, context, cancel).await)
    }

    /// Answer one question as a stream of events.
    ///
    /// The pipeline runs on a spawned task bound to a child of `cancel`;
    /// dropping the receiver cancels it.
    pub fn answer_stream(
        self: &Arc<Self>,
        req: AnswerRequest,
        cancel: CancellationToken,
    ) -> mpsc::Receiver<StreamEvent> {
        let cancel = cancel.child_token();
        let (mut assembler, rx) = StreamAssembler::channel(self.stream_buffer, cancel.clone());
        let engine = Arc::clone(self);

        tokio::spawn(async move {
            if let Err(e) = req.validate() {
                assembler.fail(&e).await;
                return;
            }
            let request_id = Uuid::new_v4().to_string();
            let span = answer_span(&request_id, &req);

            async move {
                match engine
                    .stream_inner(&request_id, &req, &mut assembler, &cancel)
                    .await
                {
                    Ok(metadata) => {
                        if assembler.finish(metadata).await.is_err() {
                            debug!("stream cancelled before completion");
                        }
                    }
                    Err(EngineError::Cancelled) => debug!("stream cancelled"),
                    Err(e) => {
                        warn!(error = %e, "streamed answer failed");
                        assembler.fail(&e).await;
                    }
                }
            }
            .instrument(span)
            .await
        });

        rx
    }

    async fn stream_inner(
        &self,
        request_id: &str,
        req: &AnswerRequest,
        assembler: &mut StreamAssembler,
        cancel: &CancellationToken,
    ) -> Result<AnswerResponse, EngineError> {
        let (context, messages) = match self.plan(req, cancel).await? {
            Plan::Refuse { topic_name } => {
                let response = AnswerResponse::refusal(request_id, &topic_name);
                assembler.emit_text(response.answer.clone()).await?;
                return Ok(response);
            }
            Plan::Generate { context, messages } => (context, messages),
        };

        let deltas = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            deltas = self.model.stream(messages, self.answer_params(), cancel.clone()) => deltas?,
        };
        assembler.forward(deltas).await?;

        let raw = assembler.text().to_string();
        Ok(self.finalize(request_id, req, &raw, context, cancel).await)
    }

    /// Scope check, then context assembly and prompt construction.
    async fn plan(&self, req: &AnswerRequest, cancel: &CancellationToken) -> Result<Plan, EngineError> {
        let topic = self.lookup_topic(req.topic_id.as_deref()).await;

        let state = ScopeState::NotChecked.begin();
        let decision = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            decision = self.scope.check_topic(&req.question, topic.as_ref()) => decision,
        };
        let state = state.resolve(&decision);
        if state.is_refused() {
            info!(reason = %decision.reason, "question refused as off-topic");
            let topic_name = decision
                .topic_name
                .or_else(|| topic.map(|t| t.name))
                .unwrap_or_default();
            return Ok(Plan::Refuse { topic_name });
        }

        let context = self
            .assembler
            .build_context(&self.context_request(req, topic.as_ref()), cancel)
            .await?;
        debug!(
            items = context.items.len(),
            used_tokens = context.used_token_budget,
            truncated = context.truncated,
            "context assembled"
        );

        let messages = answer_messages(&req.question, topic.as_ref(), &context);
        Ok(Plan::Generate { context, messages })
    }

    async fn finalize(
        &self,
        request_id: &str,
        req: &AnswerRequest,
        raw: &str,
        context: RagContext,
        cancel: &CancellationToken,
    ) -> AnswerResponse {
        let (answer, citations) = citation::resolve(raw, &context);
        let follow_up_questions = self.follow_ups(&req.question, &answer, cancel).await;
        info!(
            sources = context.items.len(),
            citations = citations.len(),
            truncated = context.truncated,
            "answer complete"
        );
        AnswerResponse {
            request_id: request_id.to_string(),
            answer,
            sources: context.items,
            citations,
            follow_up_questions,
            refusal: false,
            truncated: context.truncated,
        }
    }

    async fn lookup_topic(&self, topic_id: Option<&str>) -> Option<Topic> {
        let topic_id = topic_id?;
        match self.topics.get(topic_id).await {
            Ok(Some(topic)) => Some(topic),
            Ok(None) => {
                warn!(component = "topics", topic_id, "unknown topic, answering without scope");
                None
            }
            Err(e) => {
                warn!(component = "topics", topic_id, error = %e, "topic lookup failed");
                None
            }
        }
    }

    fn context_request(&self, req: &AnswerRequest, topic: Option<&Topic>) -> ContextRequest {
        ContextRequest {
            question: req.question.clone(),
            user_id: req.user_id.clone(),
            topic_id: req.topic_id.clone(),
            document_ids: req.document_ids.clone(),
            web_filter: WebFilter {
                topic: topic.map(|t| t.name.clone()),
                time_range: req.time_range,
                start_date: req.start_date,
                end_date: req.end_date,
                country: req.country.clone(),
            },
            enable_document_search: req.enable_document_search,
            enable_web_search: req.enable_web_search,
            max_document_chunks: req
                .max_document_chunks
                .unwrap_or(self.retrieval.max_document_chunks),
            max_web_results: req.max_web_results.unwrap_or(self.retrieval.max_web_results),
            min_score: req.min_score.unwrap_or(self.retrieval.min_score),
            max_context_tokens: self.retrieval.max_context_tokens,
        }
    }

    fn answer_params(&self) -> GenerationParams {
        GenerationParams {
            temperature: self.generation.temperature,
            max_tokens: self.generation.max_tokens,
        }
    }

    /// Best-effort follow-up suggestions. Failures yield an empty list.
    async fn follow_ups(&self, question: &str, answer: &str, cancel: &CancellationToken) -> Vec<String> {
        let count = self.generation.follow_up_questions;
        if count == 0 {
            return Vec::new();
        }
        let messages = follow_up_messages(question, answer, count);
        let params = GenerationParams {
            temperature: self.generation.temperature,
            max_tokens: FOLLOW_UP_MAX_TOKENS,
        };
        let reply = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Vec::new(),
            reply = self.model.complete(&messages, params) => reply,
        };
        match reply {
            Ok(text) => parse_follow_ups(&text, count),
            Err(e) => {
                warn!(component = "follow_ups", error = %e, "follow-up generation failed");
                Vec::new()
            }
        }
    }
}

fn answer_span(request_id: &str, req: &AnswerRequest) -> tracing::Span {
    info_span!(
        "answer",
        request_id = %request_id,
        user_id = %req.user_id,
        topic_id = req.topic_id.as_deref().unwrap_or("-"),
    )
}
