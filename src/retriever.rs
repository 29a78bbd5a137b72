//! Vector retrieval over a [`VectorStore`].
//!
//! Every search is scoped by a [`VectorFilter`], which cannot be built
//! without a user id. Results are additionally checked against that user
//! id after the store returns them, so a misbehaving backend cannot leak
//! another tenant's chunks.

use std::sync::Arc;
use std::time::Duration;

use rag_context_core::embedding::similarity_to_score;
use rag_context_core::models::{EmbeddingVector, RetrievedItem};
use rag_context_core::store::{VectorFilter, VectorStore};
use rag_context_core::EngineError;
use tracing::{debug, warn};

const RETRIEVER: &str = "vector";

pub struct VectorRetriever {
    store: Arc<dyn VectorStore>,
    timeout: Duration,
}

impl VectorRetriever {
    pub fn new(store: Arc<dyn VectorStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Nearest chunks for `query`, best first, all scoring at least
    /// `min_score`.
    ///
    /// # Errors
    ///
    /// [`EngineError::RetrieverUnavailable`] when the store fails or does
    /// not answer within the timeout. Callers treat this as an empty result.
    pub async fn search(
        &self,
        query: &EmbeddingVector,
        filter: &VectorFilter,
        top_k: usize,
        min_score: f64,
    ) -> Result<Vec<RetrievedItem>, EngineError> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let records = tokio::time::timeout(
            self.timeout,
            self.store.query(&query.values, filter, top_k),
        )
        .await
        .map_err(|_| {
            EngineError::unavailable(RETRIEVER, format!("timed out after {:?}", self.timeout))
        })?
        .map_err(|e| EngineError::unavailable(RETRIEVER, e.to_string()))?;

        let returned = records.len();
        let mut items: Vec<RetrievedItem> = records
            .into_iter()
            .filter(|scored| {
                let owned = scored.record.user_id == filter.user_id();
                if !owned {
                    warn!(
                        component = RETRIEVER,
                        record = %scored.record.id,
                        "store returned a record outside the user filter, dropping"
                    );
                }
                owned
            })
            .map(|scored| {
                let r = scored.record;
                RetrievedItem::document(
                    r.id,
                    r.document_id,
                    r.title,
                    r.text,
                    similarity_to_score(scored.similarity),
                    r.estimated_token_count,
                )
            })
            .filter(|item| item.score >= min_score)
            .collect();

        items.sort_by(|a, b| b.score.total_cmp(&a.score));
        items.truncate(top_k);

        debug!(
            component = RETRIEVER,
            filter = %filter.summary(),
            returned,
            kept = items.len(),
            "vector search complete"
        );
        Ok(items)
    }
}
