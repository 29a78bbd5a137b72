//! Wiring: builds the engine and ingestor from configuration.
//!
//! [`Components`] holds the external collaborators behind their traits.
//! [`Components::from_config`] picks the real HTTP-backed implementations;
//! tests build a `Components` out of in-process fakes instead. Either way
//! [`Services::new`] does the same assembly, so the web cache is created
//! once here and injected into the web retriever rather than living as a
//! global.

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use rag_context_core::store::{InMemoryVectorStore, VectorStore};

use crate::config::Config;
use crate::context::ContextAssembler;
use crate::embedding::{self, EmbeddingClient, EmbeddingProvider};
use crate::engine::RagEngine;
use crate::ingest::Ingestor;
use crate::llm::{GenerationModel, OpenAiChatModel};
use crate::retriever::VectorRetriever;
use crate::topics::{InMemoryTopicStore, TopicStore};
use crate::web::{self, WebCache, WebRetriever, WebSearchProvider};

pub struct Components {
    pub store: Arc<dyn VectorStore>,
    pub embedding: Option<Arc<dyn EmbeddingProvider>>,
    pub web: Option<Arc<dyn WebSearchProvider>>,
    pub model: Arc<dyn GenerationModel>,
    pub topics: Arc<dyn TopicStore>,
}

impl Components {
    /// Real providers per config, with the in-memory vector store and
    /// topics seeded from `[[topics]]`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let web_timeout = Duration::from_millis(config.retrieval.web_timeout_ms);
        Ok(Self {
            store: Arc::new(InMemoryVectorStore::new()),
            embedding: embedding::create_provider(&config.embedding)?,
            web: web::create_provider(&config.web, web_timeout)?,
            model: Arc::new(OpenAiChatModel::new(&config.generation)?),
            topics: Arc::new(InMemoryTopicStore::new(config.topics.clone())),
        })
    }
}

#[derive(Clone)]
pub struct Services {
    pub engine: Arc<RagEngine>,
    pub ingestor: Arc<Ingestor>,
    pub web_cache: Arc<WebCache>,
}

impl Services {
    pub fn new(config: &Config, components: Components) -> Self {
        let embeddings = components
            .embedding
            .map(|provider| Arc::new(EmbeddingClient::new(provider, &config.embedding)));

        let web_cache = Arc::new(WebCache::new(
            config.web.cache_max_entries,
            Duration::from_secs(config.web.cache_ttl_secs),
        ));
        let web = components.web.map(|provider| {
            WebRetriever::new(
                provider,
                web_cache.clone(),
                Duration::from_secs(config.web.cache_ttl_secs),
                Duration::from_millis(config.retrieval.web_timeout_ms),
            )
        });

        let vector = VectorRetriever::new(
            components.store.clone(),
            Duration::from_millis(config.retrieval.vector_timeout_ms),
        );

        let assembler = ContextAssembler::new(embeddings.clone(), Some(vector), web);
        let engine = RagEngine::new(
            components.topics,
            components.model,
            assembler,
            config.retrieval.clone(),
            config.generation.clone(),
            config.stream.buffer,
        );
        let ingestor = Ingestor::new(embeddings, components.store, config.chunking.clone());

        Self {
            engine: Arc::new(engine),
            ingestor: Arc::new(ingestor),
            web_cache,
        }
    }

    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self::new(config, Components::from_config(config)?))
    }
}
