//! Core data models used throughout the engine.
//!
//! These types describe the chunks produced at ingestion time, the unified
//! retrieval result shared by both backends, the budgeted context handed to
//! prompt construction, and the citations reconciled from the final answer.

use serde::{Deserialize, Serialize};

/// A bounded slice of a document's text, the unit of embedding and retrieval.
///
/// Offsets are byte offsets into the original document text.
/// `estimated_token_count` is computed once by the chunker and never updated.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chunk {
    pub document_id: String,
    pub chunk_index: usize,
    pub text: String,
    pub start_offset: usize,
    pub end_offset: usize,
    pub estimated_token_count: usize,
}

impl Chunk {
    /// Stable identifier used as the vector record id: `"{document_id}:{chunk_index}"`.
    pub fn id(&self) -> String {
        format!("{}:{}", self.document_id, self.chunk_index)
    }
}

/// A fixed-length embedding for a chunk or a query.
#[derive(Debug, Clone, PartialEq)]
pub struct EmbeddingVector {
    pub owner_id: String,
    pub values: Vec<f32>,
    pub dimension: usize,
}

impl EmbeddingVector {
    pub fn new(owner_id: impl Into<String>, values: Vec<f32>) -> Self {
        let dimension = values.len();
        Self {
            owner_id: owner_id.into(),
            values,
            dimension,
        }
    }
}

/// Which backend produced a [`RetrievedItem`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    Document,
    Web,
}

impl SourceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceType::Document => "document",
            SourceType::Web => "web",
        }
    }

    /// The citation label the generation model is told to use for this section.
    pub fn marker_label(&self) -> &'static str {
        match self {
            SourceType::Document => "Document",
            SourceType::Web => "Web Source",
        }
    }
}

/// A retrieval result from either backend, normalized at the adapter boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedItem {
    pub source_type: SourceType,
    /// Chunk id for documents, URL for web results.
    pub id: String,
    pub title: String,
    pub snippet: String,
    /// Normalized relevance in `[0.0, 1.0]`.
    pub score: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    pub estimated_token_count: usize,
}

impl RetrievedItem {
    /// Build a document item. The score is clamped into `[0, 1]`.
    pub fn document(
        chunk_id: impl Into<String>,
        document_id: impl Into<String>,
        title: impl Into<String>,
        snippet: impl Into<String>,
        score: f64,
        estimated_token_count: usize,
    ) -> Self {
        Self {
            source_type: SourceType::Document,
            id: chunk_id.into(),
            title: title.into(),
            snippet: snippet.into(),
            score: clamp_score(score),
            url: None,
            document_id: Some(document_id.into()),
            estimated_token_count,
        }
    }

    /// Build a web item keyed by its URL. The score is clamped into `[0, 1]`.
    pub fn web(
        url: impl Into<String>,
        title: impl Into<String>,
        snippet: impl Into<String>,
        score: f64,
        estimated_token_count: usize,
    ) -> Self {
        let url = url.into();
        Self {
            source_type: SourceType::Web,
            id: url.clone(),
            title: title.into(),
            snippet: snippet.into(),
            score: clamp_score(score),
            url: Some(url),
            document_id: None,
            estimated_token_count,
        }
    }
}

fn clamp_score(score: f64) -> f64 {
    if score.is_nan() {
        0.0
    } else {
        score.clamp(0.0, 1.0)
    }
}

/// The budgeted, formatted retrieval context for one request.
///
/// `items` is the rank-ordered list that produced `formatted_text`; citation
/// indices are always positions in this list.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RagContext {
    pub items: Vec<RetrievedItem>,
    pub formatted_text: String,
    pub used_token_budget: usize,
    pub truncated: bool,
}

impl RagContext {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of items of the given source type.
    pub fn section_len(&self, source_type: SourceType) -> usize {
        self.items
            .iter()
            .filter(|item| item.source_type == source_type)
            .count()
    }

    /// Map a 1-based section number (`[Document 2]` → `2`) to a position in
    /// [`items`](Self::items). Returns `None` for numbers outside the section.
    pub fn section_index(&self, source_type: SourceType, number: usize) -> Option<usize> {
        if number == 0 {
            return None;
        }
        self.items
            .iter()
            .enumerate()
            .filter(|(_, item)| item.source_type == source_type)
            .nth(number - 1)
            .map(|(idx, _)| idx)
    }
}

/// Keyword hints that help the scope classifier decide what is on-topic.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ScopeHints {
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub subtopics: Vec<String>,
}

/// A topic as returned by the topic store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Topic {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
    /// When set, off-topic questions are refused before retrieval.
    #[serde(default)]
    pub strict: bool,
    #[serde(flatten)]
    pub hints: ScopeHints,
}

/// Outcome of the scope pre-check.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopeDecision {
    pub on_topic: bool,
    pub topic_name: Option<String>,
    pub reason: String,
}

impl ScopeDecision {
    pub fn on_topic(topic_name: Option<&str>, reason: impl Into<String>) -> Self {
        Self {
            on_topic: true,
            topic_name: topic_name.map(str::to_string),
            reason: reason.into(),
        }
    }

    pub fn off_topic(topic_name: &str, reason: impl Into<String>) -> Self {
        Self {
            on_topic: false,
            topic_name: Some(topic_name.to_string()),
            reason: reason.into(),
        }
    }
}

/// An inline citation marker resolved against a [`RagContext`].
///
/// Offsets are byte offsets of the marker (brackets included) within the
/// cleaned answer text.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Citation {
    /// Marker text without brackets, e.g. `"Document 2"`.
    pub marker: String,
    pub source_type: SourceType,
    /// Position in `RagContext::items`.
    pub source_index: usize,
    pub text_offset_start: usize,
    pub text_offset_end: usize,
}
