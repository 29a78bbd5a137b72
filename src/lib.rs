//! # RAG Context Engine
//!
//! Answers a user's question from two retrieval sources at once: the user's
//! own embedded documents and live web search results. Retrieved material
//! is ranked, deduplicated and packed into a token budget, the answer is
//! generated with inline citation markers, and the markers are resolved
//! back to concrete sources. Questions against a strict topic pass a cheap
//! scope check first and are refused without any retrieval when off-topic.
//!
//! ## Architecture
//!
//! ```text
//!                 ┌──────────────┐
//!  question ────▶ │ Scope Guard  │──off-topic──▶ refusal
//!                 └──────┬───────┘
//!                        │
//!          ┌─────────────┴─────────────┐
//!          ▼                           ▼
//!  ┌───────────────┐           ┌──────────────┐
//!  │ Vector        │           │ Web          │
//!  │ Retriever     │           │ Retriever    │◀──▶ TTL cache
//!  └───────┬───────┘           └──────┬───────┘
//!          └─────────────┬────────────┘
//!                        ▼
//!                ┌───────────────┐     ┌────────────┐     ┌───────────┐
//!                │ Context       │───▶ │ Generation │───▶ │ Citation  │
//!                │ Assembler     │     │ model      │     │ Resolver  │
//!                └───────────────┘     └────────────┘     └───────────┘
//! ```
//!
//! Runtime-agnostic pieces (chunking, ranking, budgeting, citations, the
//! cache and the vector store trait) live in the `rag-context-core` crate;
//! this crate adds the network adapters and the orchestration.
//!
//! ## Quick Start
//!
//! ```bash
//! ragctx chunk notes.md
//! ragctx ask "What is the central bank rate?" --user alice --docs ./notes
//! ragctx ask "Latest inflation figures?" --user alice --no-docs --stream
//! ragctx serve
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing and validation |
//! | [`logging`] | `tracing` subscriber setup |
//! | [`embedding`] | Embedding providers plus batching/retry client |
//! | [`retriever`] | Per-user vector search with timeout |
//! | [`web`] | Web search provider, filtering and caching |
//! | [`llm`] | Generation model client (complete and stream) |
//! | [`prompt`] | Prompt construction |
//! | [`scope`] | Topic scope guard |
//! | [`topics`] | Topic lookup |
//! | [`context`] | Concurrent retrieval into one budgeted context |
//! | [`stream`] | Streamed answer events |
//! | [`engine`] | The `Answer` pipeline |
//! | [`ingest`] | Document chunking, embedding and storage |
//! | [`services`] | Component wiring from config |
//! | [`server`] | HTTP API |

pub mod config;
pub mod context;
pub mod embedding;
pub mod engine;
pub mod ingest;
pub mod llm;
pub mod logging;
pub mod prompt;
pub mod retriever;
pub mod scope;
pub mod server;
pub mod services;
pub mod stream;
pub mod topics;
pub mod web;

pub use rag_context_core as core;
