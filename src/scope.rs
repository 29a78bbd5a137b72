//! Topic scope admission control.
//!
//! Before retrieval, questions against a strict topic go through one
//! cheap YES/NO classification call. Anything other than a reply starting
//! with `NO` counts as on-topic, and any failure of the call also counts as
//! on-topic: the pre-check may never block the main answer path.
//!
//! Per request the check moves `NotChecked → Checking → OnTopic | OffTopic`.
//! `OffTopic` is terminal and the caller must skip retrieval and
//! generation entirely.

use std::sync::Arc;

use rag_context_core::models::{ScopeDecision, ScopeHints, Topic};
use rag_context_core::EngineError;
use tracing::{debug, warn};

use crate::llm::{GenerationModel, GenerationParams};
use crate::prompt::scope_messages;

/// Scope check progress for one request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopeState {
    NotChecked,
    Checking,
    OnTopic,
    OffTopic,
}

impl ScopeState {
    pub fn begin(self) -> Self {
        match self {
            ScopeState::NotChecked => ScopeState::Checking,
            other => other,
        }
    }

    pub fn resolve(self, decision: &ScopeDecision) -> Self {
        match self {
            ScopeState::Checking | ScopeState::NotChecked if decision.on_topic => ScopeState::OnTopic,
            ScopeState::Checking | ScopeState::NotChecked => ScopeState::OffTopic,
            settled => settled,
        }
    }

    /// Retrieval and generation are forbidden in this state.
    pub fn is_refused(self) -> bool {
        self == ScopeState::OffTopic
    }
}

pub struct ScopeGuard {
    model: Arc<dyn GenerationModel>,
    max_tokens: u32,
}

impl ScopeGuard {
    pub fn new(model: Arc<dyn GenerationModel>, max_tokens: u32) -> Self {
        Self {
            model,
            max_tokens: max_tokens.max(1),
        }
    }

    /// Run the gate for `topic`. A missing or non-strict topic is a no-op
    /// that returns on-topic without any model call.
    pub async fn check_topic(&self, question: &str, topic: Option<&Topic>) -> ScopeDecision {
        match topic {
            Some(topic) if topic.strict => {
                self.check_scope(
                    question,
                    &topic.name,
                    topic.description.as_deref(),
                    &topic.hints,
                )
                .await
            }
            Some(topic) => ScopeDecision::on_topic(Some(&topic.name), "topic is not strict"),
            None => ScopeDecision::on_topic(None, "no topic"),
        }
    }

    /// Classify `question` against a topic. Never fails.
    pub async fn check_scope(
        &self,
        question: &str,
        topic_name: &str,
        topic_description: Option<&str>,
        hints: &ScopeHints,
    ) -> ScopeDecision {
        match self.classify(question, topic_name, topic_description, hints).await {
            Ok(decision) => {
                debug!(
                    component = "scope",
                    topic = topic_name,
                    on_topic = decision.on_topic,
                    "scope check complete"
                );
                decision
            }
            Err(e) => {
                warn!(
                    component = "scope",
                    topic = topic_name,
                    error = %e,
                    "scope check failed, treating question as on-topic"
                );
                ScopeDecision::on_topic(Some(topic_name), format!("scope check failed: {}", e))
            }
        }
    }

    async fn classify(
        &self,
        question: &str,
        topic_name: &str,
        topic_description: Option<&str>,
        hints: &ScopeHints,
    ) -> Result<ScopeDecision, EngineError> {
        let messages = scope_messages(question, topic_name, topic_description, hints);
        let params = GenerationParams {
            temperature: 0.0,
            max_tokens: self.max_tokens,
        };
        let reply = self
            .model
            .complete(&messages, params)
            .await
            .map_err(|e| EngineError::ScopeCheck(e.to_string()))?;

        if is_refusal(&reply) {
            Ok(ScopeDecision::off_topic(
                topic_name,
                format!("classifier answered {:?}", reply.trim()),
            ))
        } else {
            Ok(ScopeDecision::on_topic(
                Some(topic_name),
                format!("classifier answered {:?}", reply.trim()),
            ))
        }
    }
}

/// A classifier reply means off-topic only when it begins with `NO`, after
/// skipping quotes, markdown and other punctuation.
fn is_refusal(reply: &str) -> bool {
    reply
        .trim_start_matches(|c: char| !c.is_alphanumeric())
        .to_uppercase()
        .starts_with("NO")
}
