//! Answer-generation model client.
//!
//! [`GenerationModel`] is the seam between the engine and a chat model: a
//! one-shot [`complete`](GenerationModel::complete) used for the scope check
//! and follow-up suggestions, and a token [`stream`](GenerationModel::stream)
//! for the answer itself.
//!
//! [`OpenAiChatModel`] talks to any OpenAI-compatible
//! `/v1/chat/completions` endpoint. Streaming responses are Server-Sent
//! Events: `data: {json}` lines terminated by `data: [DONE]`.

use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use futures_util::StreamExt;
use rag_context_core::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::GenerationConfig;

/// Capacity of the delta channel between the HTTP reader task and the caller.
const DELTA_CHANNEL_CAPACITY: usize = 32;

/// Receiving half of a streamed generation.
pub type DeltaReceiver = mpsc::Receiver<Result<String, EngineError>>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GenerationParams {
    pub temperature: f32,
    pub max_tokens: u32,
}

#[async_trait]
pub trait GenerationModel: Send + Sync {
    /// Run one non-streaming completion and return the full text.
    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: GenerationParams,
    ) -> Result<String, EngineError>;

    /// Start a streaming completion. Deltas arrive in order on the returned
    /// channel; the channel closes when generation ends. The producer stops
    /// when `cancel` fires or the receiver is dropped.
    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        params: GenerationParams,
        cancel: CancellationToken,
    ) -> Result<DeltaReceiver, EngineError>;
}

/// OpenAI-compatible chat completions client. Requires `OPENAI_API_KEY`
/// unless the endpoint is unauthenticated (local servers).
pub struct OpenAiChatModel {
    client: reqwest::Client,
    url: String,
    model: String,
    api_key: Option<String>,
}

impl OpenAiChatModel {
    pub fn new(config: &GenerationConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            client,
            url: config.url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
            api_key: std::env::var("OPENAI_API_KEY").ok(),
        })
    }

    async fn send(
        &self,
        messages: &[ChatMessage],
        params: GenerationParams,
        stream: bool,
    ) -> Result<reqwest::Response, EngineError> {
        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": params.temperature,
            "max_tokens": params.max_tokens,
            "stream": stream,
        });

        let mut request = self
            .client
            .post(format!("{}/v1/chat/completions", self.url))
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| EngineError::Generation(format!("chat request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(EngineError::Generation(format!(
                "chat API error {}: {}",
                status, text
            )));
        }
        Ok(response)
    }
}

#[async_trait]
impl GenerationModel for OpenAiChatModel {
    async fn complete(
        &self,
        messages: &[ChatMessage],
        params: GenerationParams,
    ) -> Result<String, EngineError> {
        let response = self.send(messages, params, false).await?;
        let payload: Value = response
            .json()
            .await
            .map_err(|e| EngineError::Generation(format!("invalid chat response: {}", e)))?;

        payload["choices"][0]["message"]["content"]
            .as_str()
            .map(str::to_string)
            .ok_or_else(|| EngineError::Generation("chat response has no content".to_string()))
    }

    async fn stream(
        &self,
        messages: Vec<ChatMessage>,
        params: GenerationParams,
        cancel: CancellationToken,
    ) -> Result<DeltaReceiver, EngineError> {
        let response = self.send(&messages, params, true).await?;
        let (tx, rx) = mpsc::channel(DELTA_CHANNEL_CAPACITY);
        let mut body = response.bytes_stream();

        tokio::spawn(async move {
            let mut parser = SseParser::default();
            loop {
                let next = tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("generation stream cancelled");
                        return;
                    }
                    next = body.next() => next,
                };

                let bytes = match next {
                    Some(Ok(bytes)) => bytes,
                    Some(Err(e)) => {
                        let _ = tx
                            .send(Err(EngineError::Generation(format!("stream read failed: {}", e))))
                            .await;
                        return;
                    }
                    None => return,
                };

                for event in parser.push(&bytes) {
                    match event {
                        SseEvent::Delta(text) => {
                            if tx.send(Ok(text)).await.is_err() {
                                return;
                            }
                        }
                        SseEvent::Done => return,
                    }
                }
            }
        });

        Ok(rx)
    }
}

#[derive(Debug, Clone, PartialEq)]
enum SseEvent {
    Delta(String),
    Done,
}

/// Incremental parser for chat-completion SSE bodies.
///
/// Network chunks do not align with lines, so incomplete trailing bytes are
/// held until the next push.
#[derive(Default)]
struct SseParser {
    pending: Vec<u8>,
}

impl SseParser {
    fn push(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.pending.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(pos) = self.pending.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.pending.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim_start();
            if data == "[DONE]" {
                events.push(SseEvent::Done);
                break;
            }
            if let Ok(json) = serde_json::from_str::<Value>(data) {
                if let Some(content) = json["choices"][0]["delta"]["content"].as_str() {
                    if !content.is_empty() {
                        events.push(SseEvent::Delta(content.to_string()));
                    }
                }
            }
        }
        events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delta_line(text: &str) -> String {
        format!(
            "data: {}\n\n",
            json!({"choices": [{"delta": {"content": text}}]})
        )
    }

    #[test]
    fn test_sse_parses_deltas_and_done() {
        let mut parser = SseParser::default();
        let body = format!("{}{}data: [DONE]\n\n", delta_line("Hel"), delta_line("lo"));
        let events = parser.push(body.as_bytes());
        assert_eq!(
            events,
            vec![
                SseEvent::Delta("Hel".to_string()),
                SseEvent::Delta("lo".to_string()),
                SseEvent::Done
            ]
        );
    }

    #[test]
    fn test_sse_handles_split_lines() {
        let mut parser = SseParser::default();
        let line = delta_line("[Document 1]");
        let (a, b) = line.as_bytes().split_at(12);
        assert!(parser.push(a).is_empty());
        assert_eq!(
            parser.push(b),
            vec![SseEvent::Delta("[Document 1]".to_string())]
        );
    }

    #[test]
    fn test_sse_handles_split_multibyte() {
        let mut parser = SseParser::default();
        let line = delta_line("Grüße");
        let bytes = line.as_bytes();
        let split = line.find('ü').unwrap() + 1;
        assert!(parser.push(&bytes[..split]).is_empty());
        assert_eq!(
            parser.push(&bytes[split..]),
            vec![SseEvent::Delta("Grüße".to_string())]
        );
    }

    #[test]
    fn test_sse_ignores_comments_and_role_chunks() {
        let mut parser = SseParser::default();
        let body = format!(
            ": keep-alive\ndata: {}\n\n{}",
            json!({"choices": [{"delta": {"role": "assistant"}}]}),
            delta_line("x")
        );
        assert_eq!(parser.push(body.as_bytes()), vec![SseEvent::Delta("x".to_string())]);
    }

    #[test]
    fn test_message_constructors() {
        assert_eq!(ChatMessage::system("s").role, "system");
        assert_eq!(ChatMessage::user("u").role, "user");
    }
}
