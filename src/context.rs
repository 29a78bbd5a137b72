//! Context assembly: concurrent document and web retrieval joined into one
//! budgeted [`RagContext`].
//!
//! The two retrievals run as two named futures under one `tokio::join!`;
//! the join is the only synchronization point. Each side applies its own
//! timeout and degrades to an empty list on failure, so a slow backend
//! delays the build by at most its timeout. The whole join races the
//! request's cancellation token, and dropping it on cancel drops both
//! in-flight calls. The document side's timeout covers the query embedding
//! as well as the store query.
//!
//! The only failure that aborts the build is an embedding failure when the
//! caller explicitly named documents to search and web search is off,
//! since there is then nothing left to answer from.

use std::sync::Arc;

use rag_context_core::assemble;
use rag_context_core::models::{RagContext, RetrievedItem};
use rag_context_core::store::VectorFilter;
use rag_context_core::EngineError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info_span, warn, Instrument};

use crate::embedding::EmbeddingClient;
use crate::retriever::VectorRetriever;
use crate::web::{WebFilter, WebRetriever};

/// Everything one context build needs, already resolved against config
/// defaults.
#[derive(Debug, Clone)]
pub struct ContextRequest {
    pub question: String,
    pub user_id: String,
    pub topic_id: Option<String>,
    pub document_ids: Option<Vec<String>>,
    pub web_filter: WebFilter,
    pub enable_document_search: bool,
    pub enable_web_search: bool,
    pub max_document_chunks: usize,
    pub max_web_results: usize,
    pub min_score: f64,
    pub max_context_tokens: usize,
}

pub struct ContextAssembler {
    embeddings: Option<Arc<EmbeddingClient>>,
    vector: Option<VectorRetriever>,
    web: Option<WebRetriever>,
}

impl ContextAssembler {
    pub fn new(
        embeddings: Option<Arc<EmbeddingClient>>,
        vector: Option<VectorRetriever>,
        web: Option<WebRetriever>,
    ) -> Self {
        Self {
            embeddings,
            vector,
            web,
        }
    }

    fn web_enabled(&self, req: &ContextRequest) -> bool {
        req.enable_web_search && self.web.is_some()
    }

    /// Build the context for one request.
    ///
    /// # Errors
    ///
    /// - [`EngineError::Cancelled`] if `cancel` fires before both
    ///   retrievals finish.
    /// - [`EngineError::EmbeddingProvider`] only when `document_ids` were
    ///   given and web search is disabled.
    pub async fn build_context(
        &self,
        req: &ContextRequest,
        cancel: &CancellationToken,
    ) -> Result<RagContext, EngineError> {
        if !req.enable_document_search && !req.enable_web_search {
            return Ok(RagContext::empty());
        }

        let documents = self
            .document_items(req)
            .instrument(info_span!("retrieve", component = "vector"));
        let web = self
            .web_items(req)
            .instrument(info_span!("retrieve", component = "web"));

        let (documents, web) = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(EngineError::Cancelled),
            joined = async { tokio::join!(documents, web) } => joined,
        };

        Ok(assemble::build_context(
            documents?,
            web,
            req.min_score,
            req.max_context_tokens,
        ))
    }

    async fn document_items(&self, req: &ContextRequest) -> Result<Vec<RetrievedItem>, EngineError> {
        if !req.enable_document_search {
            return Ok(Vec::new());
        }
        let explicit_documents = req.document_ids.as_ref().is_some_and(|ids| !ids.is_empty());
        let fatal = explicit_documents && !self.web_enabled(req);

        let (Some(embeddings), Some(vector)) = (&self.embeddings, &self.vector) else {
            return embedding_failure(
                EngineError::embedding_terminal("no embedding provider configured"),
                fatal,
            );
        };

        // The query embedding and the search share one deadline, so a slow
        // embedding provider is bounded by the vector timeout too.
        let timeout = vector.timeout();
        let deadline = Instant::now() + timeout;

        let query = match tokio::time::timeout_at(deadline, embeddings.embed_query(&req.question)).await {
            Ok(Ok(query)) => query,
            Ok(Err(e)) => return embedding_failure(e, fatal),
            Err(_) => {
                return embedding_failure(
                    EngineError::embedding_transient(format!(
                        "query embedding timed out after {:?}",
                        timeout
                    )),
                    fatal,
                )
            }
        };

        let filter = VectorFilter::for_user(req.user_id.as_str())
            .with_topic(req.topic_id.as_deref())
            .with_documents(req.document_ids.clone());

        let searched = tokio::time::timeout_at(
            deadline,
            vector.search(&query, &filter, req.max_document_chunks, req.min_score),
        )
        .await
        .unwrap_or_else(|_| {
            Err(EngineError::unavailable(
                "vector",
                format!("timed out after {:?}", timeout),
            ))
        });

        match searched {
            Ok(items) => Ok(items),
            Err(e) => {
                warn!(
                    component = "vector",
                    filter = %filter.summary(),
                    error = %e,
                    "vector retrieval unavailable, continuing without documents"
                );
                Ok(Vec::new())
            }
        }
    }

    async fn web_items(&self, req: &ContextRequest) -> Vec<RetrievedItem> {
        match &self.web {
            Some(web) if req.enable_web_search => {
                web.search(&req.question, &req.web_filter, req.max_web_results)
                    .await
            }
            _ => Vec::new(),
        }
    }
}

fn embedding_failure(error: EngineError, fatal: bool) -> Result<Vec<RetrievedItem>, EngineError> {
    if fatal {
        return Err(error);
    }
    warn!(
        component = "embedding",
        error = %error,
        "query embedding failed, continuing without documents"
    );
    Ok(Vec::new())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request() -> ContextRequest {
        ContextRequest {
            question: "q".to_string(),
            user_id: "alice".to_string(),
            topic_id: None,
            document_ids: None,
            web_filter: WebFilter::default(),
            enable_document_search: true,
            enable_web_search: true,
            max_document_chunks: 8,
            max_web_results: 5,
            min_score: 0.7,
            max_context_tokens: 1000,
        }
    }

    #[tokio::test]
    async fn test_both_disabled_is_empty() {
        let assembler = ContextAssembler::new(None, None, None);
        let mut req = request();
        req.enable_document_search = false;
        req.enable_web_search = false;
        let ctx = assembler
            .build_context(&req, &CancellationToken::new())
            .await
            .unwrap();
        assert!(ctx.is_empty());
    }

    #[tokio::test]
    async fn test_unconfigured_backends_degrade() {
        let assembler = ContextAssembler::new(None, None, None);
        let ctx = assembler
            .build_context(&request(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(ctx.is_empty());
        assert!(!ctx.truncated);
    }

    #[tokio::test]
    async fn test_explicit_documents_without_embeddings_abort() {
        let assembler = ContextAssembler::new(None, None, None);
        let mut req = request();
        req.document_ids = Some(vec!["d1".to_string()]);
        let err = assembler
            .build_context(&req, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::EmbeddingProvider { .. }));
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let assembler = ContextAssembler::new(None, None, None);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = assembler.build_context(&request(), &cancel).await.unwrap_err();
        assert_eq!(err, EngineError::Cancelled);
    }
}
