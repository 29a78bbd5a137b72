//! In-memory [`VectorStore`] implementation for tests, the CLI and the
//! single-process server.
//!
//! Records live in a `Vec` behind a `parking_lot::RwLock`. Queries are a
//! brute-force cosine scan over the records that pass the filter.

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::RwLock;

use crate::embedding::cosine_similarity;

use super::{ScoredRecord, VectorFilter, VectorRecord, VectorStore};

/// In-memory vector store.
#[derive(Default)]
pub struct InMemoryVectorStore {
    records: RwLock<Vec<VectorRecord>>,
}

impl InMemoryVectorStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }
}

#[async_trait]
impl VectorStore for InMemoryVectorStore {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()> {
        let mut stored = self.records.write();
        for record in records {
            stored.retain(|r| !(r.user_id == record.user_id && r.id == record.id));
            stored.push(record);
        }
        Ok(())
    }

    async fn query(
        &self,
        vector: &[f32],
        filter: &VectorFilter,
        top_k: usize,
    ) -> Result<Vec<ScoredRecord>> {
        let stored = self.records.read();
        let mut scored: Vec<ScoredRecord> = stored
            .iter()
            .filter(|r| filter.matches(r))
            .map(|r| ScoredRecord {
                similarity: cosine_similarity(vector, &r.values),
                record: r.clone(),
            })
            .collect();
        scored.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.record.id.cmp(&b.record.id))
        });
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn delete_by_filter(&self, filter: &VectorFilter) -> Result<usize> {
        let mut stored = self.records.write();
        let before = stored.len();
        stored.retain(|r| !filter.matches(r));
        Ok(before - stored.len())
    }
}
