//! Document ingestion: chunk → embed → replace in the vector store.
//!
//! A document is identified by `(user_id, document_id)`. Re-ingesting it
//! replaces every chunk from the previous version, so a shorter revision
//! never leaves stale trailing chunks behind. Embedding runs before the
//! old chunks are deleted, so a provider failure leaves the previous
//! version searchable.

use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use rag_context_core::chunk::chunk_text;
use rag_context_core::store::{VectorFilter, VectorRecord, VectorStore};
use rag_context_core::EngineError;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::config::ChunkingConfig;
use crate::embedding::EmbeddingClient;

/// File extensions picked up by [`Ingestor::ingest_directory`].
const TEXT_EXTENSIONS: &[&str] = &["md", "txt"];

#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    pub user_id: String,
    #[serde(default)]
    pub topic_id: Option<String>,
    pub document_id: String,
    /// Defaults to the document id.
    #[serde(default)]
    pub title: Option<String>,
    pub text: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct IngestSummary {
    pub documents: usize,
    pub chunks: usize,
}

pub struct Ingestor {
    embeddings: Option<Arc<EmbeddingClient>>,
    store: Arc<dyn VectorStore>,
    chunking: ChunkingConfig,
}

impl Ingestor {
    pub fn new(
        embeddings: Option<Arc<EmbeddingClient>>,
        store: Arc<dyn VectorStore>,
        chunking: ChunkingConfig,
    ) -> Self {
        Self {
            embeddings,
            store,
            chunking,
        }
    }

    /// Chunk, embed and store one document, replacing any earlier version.
    /// Returns the number of chunks stored.
    ///
    /// # Errors
    ///
    /// - [`EngineError::InvalidRequest`] for an empty user or document id.
    /// - [`EngineError::EmptyInput`] for whitespace-only text.
    /// - [`EngineError::EmbeddingProvider`] when embedding fails or no
    ///   provider is configured.
    /// - [`EngineError::Store`] when the vector store rejects the write.
    pub async fn ingest_document(&self, req: &IngestRequest) -> Result<usize, EngineError> {
        if req.user_id.trim().is_empty() {
            return Err(EngineError::InvalidRequest("user_id is empty".to_string()));
        }
        if req.document_id.trim().is_empty() {
            return Err(EngineError::InvalidRequest("document_id is empty".to_string()));
        }
        let embeddings = self
            .embeddings
            .as_ref()
            .ok_or_else(|| EngineError::embedding_terminal("no embedding provider configured"))?;

        let chunks = chunk_text(
            &req.document_id,
            &req.text,
            self.chunking.target_tokens,
            self.chunking.overlap_tokens,
        )?;

        let inputs: Vec<(String, String)> = chunks.iter().map(|c| (c.id(), c.text.clone())).collect();
        let vectors = embeddings.embed(&inputs).await?;

        let title = req.title.clone().unwrap_or_else(|| req.document_id.clone());
        let records: Vec<VectorRecord> = chunks
            .into_iter()
            .zip(vectors)
            .map(|(chunk, vector)| VectorRecord {
                id: chunk.id(),
                user_id: req.user_id.clone(),
                topic_id: req.topic_id.clone(),
                document_id: chunk.document_id,
                chunk_index: chunk.chunk_index,
                title: title.clone(),
                text: chunk.text,
                estimated_token_count: chunk.estimated_token_count,
                values: vector.values,
            })
            .collect();
        let count = records.len();

        let previous = VectorFilter::for_user(req.user_id.as_str())
            .with_documents(Some(vec![req.document_id.clone()]));
        let replaced = self
            .store
            .delete_by_filter(&previous)
            .await
            .map_err(|e| EngineError::Store(e.to_string()))?;
        self.store
            .upsert(records)
            .await
            .map_err(|e| EngineError::Store(e.to_string()))?;

        info!(
            user_id = %req.user_id,
            document_id = %req.document_id,
            chunks = count,
            replaced,
            model = embeddings.model_name(),
            "document ingested"
        );
        Ok(count)
    }

    /// Remove every chunk of one document. Returns the number removed.
    pub async fn delete_document(&self, user_id: &str, document_id: &str) -> Result<usize, EngineError> {
        if user_id.trim().is_empty() || document_id.trim().is_empty() {
            return Err(EngineError::InvalidRequest(
                "user_id and document_id are required".to_string(),
            ));
        }
        let filter = VectorFilter::for_user(user_id).with_documents(Some(vec![document_id.to_string()]));
        let removed = self
            .store
            .delete_by_filter(&filter)
            .await
            .map_err(|e| EngineError::Store(e.to_string()))?;
        info!(user_id, document_id, removed, "document deleted");
        Ok(removed)
    }

    /// Ingest every `.md` / `.txt` file under `root` for `user_id`.
    ///
    /// Document ids are paths relative to `root`; titles are file stems.
    /// Empty files are skipped.
    pub async fn ingest_directory(
        &self,
        user_id: &str,
        topic_id: Option<&str>,
        root: &Path,
    ) -> Result<IngestSummary> {
        if !root.is_dir() {
            bail!("Document directory does not exist: {}", root.display());
        }

        let mut summary = IngestSummary::default();
        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = entry?;
            if !entry.file_type().is_file() {
                continue;
            }
            let path = entry.path();
            let supported = path
                .extension()
                .and_then(|e| e.to_str())
                .is_some_and(|e| TEXT_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()));
            if !supported {
                debug!(path = %path.display(), "skipping unsupported file");
                continue;
            }

            let relative = path.strip_prefix(root).unwrap_or(path);
            let document_id = relative.to_string_lossy().replace('\\', "/");
            let text = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read {}", path.display()))?;

            let req = IngestRequest {
                user_id: user_id.to_string(),
                topic_id: topic_id.map(str::to_string),
                title: path
                    .file_stem()
                    .map(|s| s.to_string_lossy().to_string()),
                document_id,
                text,
            };
            match self.ingest_document(&req).await {
                Ok(chunks) => {
                    summary.documents += 1;
                    summary.chunks += chunks;
                }
                Err(EngineError::EmptyInput) => {
                    warn!(path = %path.display(), "skipping empty file");
                }
                Err(e) => {
                    return Err(e).with_context(|| format!("Failed to ingest {}", path.display()));
                }
            }
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::EmbeddingProvider;
    use async_trait::async_trait;
    use rag_context_core::store::InMemoryVectorStore;
    use std::time::Duration;

    struct LengthProvider;

    #[async_trait]
    impl EmbeddingProvider for LengthProvider {
        fn model_name(&self) -> &str {
            "length"
        }
        fn dims(&self) -> usize {
            2
        }
        async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EngineError> {
            Ok(texts.iter().map(|t| vec![1.0, t.len() as f32]).collect())
        }
    }

    fn ingestor(store: Arc<InMemoryVectorStore>) -> Ingestor {
        let client = EmbeddingClient::with_settings(Arc::new(LengthProvider), 10, 0, Duration::from_millis(1));
        Ingestor::new(
            Some(Arc::new(client)),
            store,
            ChunkingConfig {
                target_tokens: 10,
                overlap_tokens: 2,
            },
        )
    }

    fn request(document_id: &str, text: &str) -> IngestRequest {
        IngestRequest {
            user_id: "alice".to_string(),
            topic_id: None,
            document_id: document_id.to_string(),
            title: None,
            text: text.to_string(),
        }
    }

    #[tokio::test]
    async fn test_ingest_and_replace() {
        let store = Arc::new(InMemoryVectorStore::new());
        let ingestor = ingestor(store.clone());

        let long = "First sentence here. Second sentence here. Third sentence here. Fourth one.";
        let first = ingestor.ingest_document(&request("doc", long)).await.unwrap();
        assert!(first > 1);
        assert_eq!(store.len(), first);

        let second = ingestor
            .ingest_document(&request("doc", "Short now."))
            .await
            .unwrap();
        assert_eq!(second, 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_text_rejected() {
        let ingestor = ingestor(Arc::new(InMemoryVectorStore::new()));
        let err = ingestor.ingest_document(&request("doc", "  \n")).await.unwrap_err();
        assert_eq!(err, EngineError::EmptyInput);
    }

    #[tokio::test]
    async fn test_no_provider_is_embedding_error() {
        let ingestor = Ingestor::new(
            None,
            Arc::new(InMemoryVectorStore::new()),
            ChunkingConfig::default(),
        );
        let err = ingestor.ingest_document(&request("doc", "text")).await.unwrap_err();
        assert!(matches!(err, EngineError::EmbeddingProvider { retryable: false, .. }));
    }

    #[tokio::test]
    async fn test_delete_document_is_per_user() {
        let store = Arc::new(InMemoryVectorStore::new());
        let ingestor = ingestor(store.clone());
        ingestor.ingest_document(&request("doc", "Alice text.")).await.unwrap();
        let mut bob = request("doc", "Bob text.");
        bob.user_id = "bob".to_string();
        ingestor.ingest_document(&bob).await.unwrap();

        assert_eq!(ingestor.delete_document("alice", "doc").await.unwrap(), 1);
        assert_eq!(store.len(), 1);
        assert_eq!(ingestor.delete_document("alice", "doc").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_ingest_directory_filters_extensions() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.md"), "# Notes\nSome notes.").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b.txt"), "Plain text.").unwrap();
        std::fs::write(dir.path().join("c.bin"), "ignored").unwrap();
        std::fs::write(dir.path().join("empty.md"), "   ").unwrap();

        let store = Arc::new(InMemoryVectorStore::new());
        let summary = ingestor(store.clone())
            .ingest_directory("alice", Some("notes"), dir.path())
            .await
            .unwrap();
        assert_eq!(summary.documents, 2);
        assert_eq!(summary.chunks, store.len());
    }
}
