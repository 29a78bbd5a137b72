//! HTTP API.
//!
//! # Endpoints
//!
//! | Method   | Path | Description |
//! |----------|------|-------------|
//! | `GET`    | `/health` | Health check (returns version) |
//! | `POST`   | `/documents` | Ingest one document |
//! | `DELETE` | `/documents/{user_id}/{document_id}` | Remove a document's chunks |
//! | `POST`   | `/answer` | Answer a question, JSON response |
//! | `POST`   | `/answer/stream` | Answer a question as Server-Sent Events |
//! | `GET`    | `/cache/stats` | Web result cache statistics |
//! | `POST`   | `/cache/clear` | Drop every cached web result |
//!
//! # Error Contract
//!
//! ```json
//! { "error": { "code": "bad_request", "message": "question is empty" } }
//! ```
//!
//! Error codes: `bad_request` (400), `cancelled` (408),
//! `embedding_failed` (502), `generation_failed` (502), `unavailable` (503),
//! `internal` (500).
//!
//! # Streaming
//!
//! `/answer/stream` emits `delta` events carrying JSON text fragments, one
//! `metadata` event with the full [`AnswerResponse`], then `done`. A failure
//! after the stream opened arrives as a single `error` event. Closing the
//! connection cancels the request.
//!
//! # CORS
//!
//! All origins, methods, and headers are permitted to support browser-based
//! clients.

use std::convert::Infallible;

use axum::{
    extract::{rejection::JsonRejection, Path, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::{delete, get, post},
    Json, Router,
};
use futures_util::stream::{self, Stream};
use rag_context_core::cache::CacheStats;
use rag_context_core::EngineError;
use serde::Serialize;
use serde_json::json;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tracing::{info, warn};

use crate::config::Config;
use crate::engine::{AnswerRequest, AnswerResponse};
use crate::ingest::IngestRequest;
use crate::services::Services;
use crate::stream::StreamEvent;

/// Starts the HTTP server on `[server].bind` and runs until `shutdown`
/// fires.
pub async fn run_server(config: &Config, services: Services, shutdown: CancellationToken) -> anyhow::Result<()> {
    let bind_addr = config.server.bind.clone();
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(bind = %bind_addr, "server listening");

    axum::serve(listener, router(services))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await?;

    info!("server stopped");
    Ok(())
}

/// Builds the router with all routes and permissive CORS.
pub fn router(services: Services) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(handle_health))
        .route("/documents", post(handle_ingest))
        .route("/documents/{user_id}/{document_id}", delete(handle_delete))
        .route("/answer", post(handle_answer))
        .route("/answer/stream", post(handle_answer_stream))
        .route("/cache/stats", get(handle_cache_stats))
        .route("/cache/clear", post(handle_cache_clear))
        .layer(cors)
        .with_state(services)
}

// ============ Error response ============

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    /// Machine-readable error code (e.g., `"bad_request"`).
    code: String,
    message: String,
}

struct AppError {
    status: StatusCode,
    code: String,
    message: String,
}

impl AppError {
    fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        Self {
            status,
            code: code.to_string(),
            message: message.into(),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: ErrorDetail {
                code: self.code,
                message: self.message,
            },
        };
        (self.status, Json(body)).into_response()
    }
}

fn bad_request(message: impl Into<String>) -> AppError {
    AppError::new(StatusCode::BAD_REQUEST, "bad_request", message)
}

impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        bad_request(rejection.body_text())
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        let message = err.to_string();
        match err {
            EngineError::InvalidRequest(_) | EngineError::EmptyInput => bad_request(message),
            EngineError::Cancelled => AppError::new(StatusCode::REQUEST_TIMEOUT, "cancelled", message),
            EngineError::EmbeddingProvider { .. } => {
                AppError::new(StatusCode::BAD_GATEWAY, "embedding_failed", message)
            }
            EngineError::Generation(_) => {
                AppError::new(StatusCode::BAD_GATEWAY, "generation_failed", message)
            }
            EngineError::RetrieverUnavailable { .. } | EngineError::ScopeCheck(_) => {
                AppError::new(StatusCode::SERVICE_UNAVAILABLE, "unavailable", message)
            }
            EngineError::Store(_) => {
                AppError::new(StatusCode::INTERNAL_SERVER_ERROR, "internal", message)
            }
        }
    }
}

// ============ GET /health ============

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

async fn handle_health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

// ============ Documents ============

#[derive(Serialize)]
struct IngestResponse {
    document_id: String,
    chunks: usize,
}

async fn handle_ingest(
    State(services): State<Services>,
    body: Result<Json<IngestRequest>, JsonRejection>,
) -> Result<Json<IngestResponse>, AppError> {
    let Json(req) = body?;
    let chunks = services.ingestor.ingest_document(&req).await?;
    Ok(Json(IngestResponse {
        document_id: req.document_id,
        chunks,
    }))
}

async fn handle_delete(
    State(services): State<Services>,
    Path((user_id, document_id)): Path<(String, String)>,
) -> Result<Json<serde_json::Value>, AppError> {
    let removed = services
        .ingestor
        .delete_document(&user_id, &document_id)
        .await?;
    Ok(Json(json!({ "removed": removed })))
}

// ============ Answer ============

async fn handle_answer(
    State(services): State<Services>,
    body: Result<Json<AnswerRequest>, JsonRejection>,
) -> Result<Json<AnswerResponse>, AppError> {
    let Json(req) = body?;
    // Dropping the handler future (client gone) cancels the pipeline.
    let cancel = CancellationToken::new();
    let _guard = cancel.clone().drop_guard();
    let response = services.engine.answer(req, cancel).await?;
    Ok(Json(response))
}

async fn handle_answer_stream(
    State(services): State<Services>,
    body: Result<Json<AnswerRequest>, JsonRejection>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    let Json(req) = body?;
    req.validate()?;

    let rx = services.engine.answer_stream(req, CancellationToken::new());
    let events = stream::unfold(rx, |mut rx| async move {
        let event = rx.recv().await?;
        Some((Ok::<_, Infallible>(sse_event(&event)), rx))
    });
    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

fn sse_event(event: &StreamEvent) -> Event {
    let payload = match event {
        StreamEvent::TextDelta(text) => json!(text),
        StreamEvent::Metadata(metadata) => json!(metadata),
        StreamEvent::Done => json!({}),
        StreamEvent::Error(message) => json!({ "message": message }),
    };
    match Event::default().event(event.name()).json_data(payload) {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "failed to encode stream event");
            Event::default().event("error").data("failed to encode event")
        }
    }
}

// ============ Cache ============

async fn handle_cache_stats(State(services): State<Services>) -> Json<CacheStats> {
    Json(services.web_cache.stats())
}

async fn handle_cache_clear(State(services): State<Services>) -> Json<serde_json::Value> {
    services.web_cache.clear();
    info!("web cache cleared");
    Json(json!({ "cleared": true }))
}
