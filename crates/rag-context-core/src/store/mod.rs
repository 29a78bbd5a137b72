//! Vector store abstraction.
//!
//! The [`VectorStore`] trait is the narrow interface the engine needs from a
//! vector database: upsert records, query nearest neighbours under a
//! metadata filter, and delete by filter. Every filter is scoped to a single
//! user; there is no way to build one without a user id.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use memory::InMemoryVectorStore;

/// A chunk embedding plus the metadata needed to filter and cite it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VectorRecord {
    /// Chunk id (`"{document_id}:{chunk_index}"`).
    pub id: String,
    pub user_id: String,
    pub topic_id: Option<String>,
    pub document_id: String,
    pub chunk_index: usize,
    pub title: String,
    pub text: String,
    pub estimated_token_count: usize,
    pub values: Vec<f32>,
}

/// A record returned from [`VectorStore::query`] with its cosine similarity.
#[derive(Debug, Clone)]
pub struct ScoredRecord {
    pub record: VectorRecord,
    /// Raw cosine similarity in `[-1, 1]`.
    pub similarity: f32,
}

/// Metadata filter for queries and deletes.
///
/// The user id is fixed at construction and cannot be changed or removed.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorFilter {
    user_id: String,
    topic_id: Option<String>,
    document_ids: Option<Vec<String>>,
}

impl VectorFilter {
    pub fn for_user(user_id: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            topic_id: None,
            document_ids: None,
        }
    }

    #[must_use]
    pub fn with_topic(mut self, topic_id: Option<impl Into<String>>) -> Self {
        self.topic_id = topic_id.map(Into::into);
        self
    }

    /// Restrict to these documents. An empty list is treated as no restriction.
    #[must_use]
    pub fn with_documents(mut self, document_ids: Option<Vec<String>>) -> Self {
        self.document_ids = document_ids.filter(|ids| !ids.is_empty());
        self
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn topic_id(&self) -> Option<&str> {
        self.topic_id.as_deref()
    }

    pub fn document_ids(&self) -> Option<&[String]> {
        self.document_ids.as_deref()
    }

    pub fn matches(&self, record: &VectorRecord) -> bool {
        if record.user_id != self.user_id {
            return false;
        }
        if let Some(topic) = &self.topic_id {
            if record.topic_id.as_deref() != Some(topic.as_str()) {
                return false;
            }
        }
        if let Some(ids) = &self.document_ids {
            if !ids.iter().any(|id| *id == record.document_id) {
                return false;
            }
        }
        true
    }

    /// Short description for log lines.
    pub fn summary(&self) -> String {
        format!(
            "user={} topic={} documents={}",
            self.user_id,
            self.topic_id.as_deref().unwrap_or("-"),
            self.document_ids.as_ref().map_or(0, Vec::len)
        )
    }
}

/// Abstract vector database backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`upsert`](VectorStore::upsert) | Insert or replace records by `(user_id, id)` |
/// | [`query`](VectorStore::query) | Nearest neighbours under a filter, best first |
/// | [`delete_by_filter`](VectorStore::delete_by_filter) | Remove every record matching a filter |
#[async_trait]
pub trait VectorStore: Send + Sync {
    async fn upsert(&self, records: Vec<VectorRecord>) -> Result<()>;

    /// Return at most `top_k` records matching `filter`, sorted by
    /// descending similarity.
    async fn query(
        &self,
        vector: &[f32],
        filter: &VectorFilter,
        top_k: usize,
    ) -> Result<Vec<ScoredRecord>>;

    /// Returns the number of records removed.
    async fn delete_by_filter(&self, filter: &VectorFilter) -> Result<usize>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(user: &str, topic: Option<&str>, doc: &str) -> VectorRecord {
        VectorRecord {
            id: format!("{}:0", doc),
            user_id: user.to_string(),
            topic_id: topic.map(str::to_string),
            document_id: doc.to_string(),
            chunk_index: 0,
            title: doc.to_string(),
            text: String::new(),
            estimated_token_count: 0,
            values: vec![1.0],
        }
    }

    #[test]
    fn test_filter_requires_user() {
        let f = VectorFilter::for_user("alice");
        assert!(f.matches(&record("alice", None, "d1")));
        assert!(!f.matches(&record("bob", None, "d1")));
    }

    #[test]
    fn test_filter_topic_and_documents() {
        let f = VectorFilter::for_user("alice")
            .with_topic(Some("t1"))
            .with_documents(Some(vec!["d2".to_string()]));
        assert!(f.matches(&record("alice", Some("t1"), "d2")));
        assert!(!f.matches(&record("alice", Some("t1"), "d1")));
        assert!(!f.matches(&record("alice", Some("t2"), "d2")));
        assert!(!f.matches(&record("alice", None, "d2")));
        assert!(!f.matches(&record("bob", Some("t1"), "d2")));
    }

    #[test]
    fn test_empty_document_list_is_unrestricted() {
        let f = VectorFilter::for_user("alice").with_documents(Some(Vec::new()));
        assert!(f.document_ids().is_none());
        assert!(f.matches(&record("alice", None, "anything")));
    }
}
