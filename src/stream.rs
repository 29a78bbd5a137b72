//! Streamed answer events.
//!
//! A streaming answer is delivered as zero or more [`StreamEvent::TextDelta`]
//! events, exactly one [`StreamEvent::Metadata`], then exactly one
//! [`StreamEvent::Done`]. A request that fails after it started streaming
//! ends with a single [`StreamEvent::Error`] instead of metadata.
//!
//! [`StreamAssembler`] owns the sending half of a bounded channel. A slow
//! consumer pauses the producer (the send waits for capacity), and a
//! consumer that goes away cancels the request's token so the in-flight
//! generation and any pending retrieval stop too. Once the token is
//! cancelled no further event is sent.

use rag_context_core::EngineError;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::engine::AnswerResponse;
use crate::llm::DeltaReceiver;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    TextDelta(String),
    Metadata(Box<AnswerResponse>),
    Done,
    Error(String),
}

impl StreamEvent {
    /// SSE event name.
    pub fn name(&self) -> &'static str {
        match self {
            StreamEvent::TextDelta(_) => "delta",
            StreamEvent::Metadata(_) => "metadata",
            StreamEvent::Done => "done",
            StreamEvent::Error(_) => "error",
        }
    }
}

pub struct StreamAssembler {
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
    text: String,
}

impl StreamAssembler {
    /// Create an assembler and the receiver handed to the caller.
    pub fn channel(buffer: usize, cancel: CancellationToken) -> (Self, mpsc::Receiver<StreamEvent>) {
        let (tx, rx) = mpsc::channel(buffer.max(1));
        (
            Self {
                tx,
                cancel,
                text: String::new(),
            },
            rx,
        )
    }

    /// Text emitted so far, concatenated.
    pub fn text(&self) -> &str {
        &self.text
    }

    async fn send(&self, event: StreamEvent) -> Result<(), EngineError> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(EngineError::Cancelled),
            sent = self.tx.send(event) => sent.map_err(|_| {
                debug!("stream consumer went away, cancelling request");
                self.cancel.cancel();
                EngineError::Cancelled
            }),
        }
    }

    /// Emit one text delta and append it to the accumulated answer.
    pub async fn emit_text(&mut self, text: impl Into<String>) -> Result<(), EngineError> {
        let text = text.into();
        if text.is_empty() {
            return Ok(());
        }
        self.text.push_str(&text);
        self.send(StreamEvent::TextDelta(text)).await
    }

    /// Forward generation deltas as they arrive until the model finishes.
    ///
    /// Returns the model's error if generation fails mid-stream, or
    /// [`EngineError::Cancelled`] if the token fires first.
    pub async fn forward(&mut self, mut deltas: DeltaReceiver) -> Result<(), EngineError> {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(EngineError::Cancelled),
                _ = self.tx.closed() => {
                    debug!("stream consumer went away, cancelling request");
                    self.cancel.cancel();
                    return Err(EngineError::Cancelled);
                }
                next = deltas.recv() => next,
            };
            match next {
                Some(Ok(delta)) => self.emit_text(delta).await?,
                Some(Err(e)) => return Err(e),
                None => return Ok(()),
            }
        }
    }

    /// Emit the closing `Metadata` and `Done` events.
    pub async fn finish(self, metadata: AnswerResponse) -> Result<(), EngineError> {
        self.send(StreamEvent::Metadata(Box::new(metadata))).await?;
        self.send(StreamEvent::Done).await
    }

    /// Emit a terminal error event. Nothing is sent after cancellation.
    pub async fn fail(self, error: &EngineError) {
        let _ = self.send(StreamEvent::Error(error.to_string())).await;
    }
}
