//! # RAG Context Core
//!
//! Runtime-agnostic logic for the RAG context engine: data models, sentence
//! chunking, the vector store abstraction, result ranking and token
//! budgeting, citation resolution and the shared TTL cache.
//!
//! This crate contains no tokio, reqwest, or filesystem I/O. Network
//! adapters and request orchestration live in the `rag-context-engine`
//! crate.

pub mod assemble;
pub mod cache;
pub mod chunk;
pub mod citation;
pub mod embedding;
pub mod error;
pub mod models;
pub mod store;

pub use error::EngineError;
