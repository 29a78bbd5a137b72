//! Error taxonomy shared by every engine component.
//!
//! Budget overflow and out-of-range citation markers are not errors: the
//! first is recorded as [`RagContext::truncated`](crate::models::RagContext)
//! and the second is left in the answer as literal text.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum EngineError {
    /// Input text was empty after whitespace normalization.
    #[error("input text is empty")]
    EmptyInput,

    /// The embedding provider failed. `retryable` distinguishes transient
    /// failures (network, 429, 5xx) from terminal ones (bad input, auth).
    #[error("embedding provider error: {message}")]
    EmbeddingProvider { retryable: bool, message: String },

    /// A retriever backend could not be reached or timed out. Callers
    /// degrade to an empty result set.
    #[error("{retriever} retriever unavailable: {reason}")]
    RetrieverUnavailable {
        retriever: &'static str,
        reason: String,
    },

    /// The scope pre-check failed. Always absorbed as on-topic.
    #[error("scope check failed: {0}")]
    ScopeCheck(String),

    /// The answer-generation model failed.
    #[error("generation failed: {0}")]
    Generation(String),

    #[error("vector store error: {0}")]
    Store(String),

    #[error("request cancelled")]
    Cancelled,

    #[error("invalid request: {0}")]
    InvalidRequest(String),
}

impl EngineError {
    pub fn embedding_transient(message: impl Into<String>) -> Self {
        EngineError::EmbeddingProvider {
            retryable: true,
            message: message.into(),
        }
    }

    pub fn embedding_terminal(message: impl Into<String>) -> Self {
        EngineError::EmbeddingProvider {
            retryable: false,
            message: message.into(),
        }
    }

    pub fn unavailable(retriever: &'static str, reason: impl Into<String>) -> Self {
        EngineError::RetrieverUnavailable {
            retriever,
            reason: reason.into(),
        }
    }

    /// Whether retrying the same call may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            EngineError::EmbeddingProvider {
                retryable: true,
                ..
            }
        )
    }
}
