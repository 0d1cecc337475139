//! Streaming chat completions delivered as a channel of [`StreamEvent`]s.
//!
//! [`ChatStreamClient::open`] performs the HTTP request and, once the
//! response headers arrive, hands the body to a reader task. The reader
//! decodes every `data:` frame independently and forwards text deltas until
//! a terminal event:
//!
//! - `[DONE]`, a non-empty `finish_reason`, or the body ending → `Done`
//! - a payload containing `{` that is not valid chunk JSON → `Error(StreamDecode)`
//! - a line longer than [`MAX_LINE_BYTES`] → `Error(StreamDecode)`
//! - a transport failure mid-body → `Error(StreamOpen)`
//! - the cancellation token firing → `Error(Cancelled)`
//!
//! Payloads that are neither JSON nor contain `{` are skipped. The reader
//! never retries.

use std::fmt::Display;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::config::StreamConfig;
use crate::error::{PipelineError, Result};
use crate::llm::chat::{ChatEndpoint, error_body};
use crate::llm::message::{ChatMessage, StreamEvent};
use crate::llm::sse::{MAX_LINE_BYTES, SseFrame, SseFrameDecoder};

/// Opens a streaming chat completion.
///
/// The returned receiver yields zero or more `Delta`s followed by exactly one
/// terminal event, then closes.
#[async_trait]
pub trait ChatStreamer: Send + Sync {
    /// Start streaming a reply to `messages`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::StreamOpen`] if the request cannot be sent or
    /// is rejected, and [`PipelineError::Cancelled`] if `cancel` fires first.
    async fn open(
        &self,
        messages: Vec<ChatMessage>,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<StreamEvent>>;
}

// ── Chunk decoding ────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    #[serde(default)]
    delta: StreamDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

/// What one decoded payload contributes to the stream.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ChunkUpdate {
    /// Non-empty text deltas, in choice order.
    pub deltas: Vec<String>,
    /// Whether a choice reported a finish reason.
    pub finished: bool,
}

/// Decode one `data:` payload.
///
/// Returns `Ok(None)` for payloads that are not event data at all.
///
/// # Errors
///
/// Returns [`PipelineError::StreamDecode`] when a JSON-looking payload is malformed.
pub fn decode_chunk(payload: &str) -> Result<Option<ChunkUpdate>> {
    let chunk: StreamChunk = match serde_json::from_str(payload) {
        Ok(chunk) => chunk,
        Err(_) if !payload.contains('{') => return Ok(None),
        Err(e) => {
            return Err(PipelineError::StreamDecode(format!(
                "decode stream chunk: {e}"
            )));
        }
    };

    let mut update = ChunkUpdate::default();
    for choice in chunk.choices {
        if let Some(content) = choice.delta.content
            && !content.is_empty()
        {
            update.deltas.push(content);
        }
        if choice
            .finish_reason
            .as_deref()
            .is_some_and(|r| !r.trim().is_empty())
        {
            update.finished = true;
            break;
        }
    }
    Ok(Some(update))
}

// ── Client ────────────────────────────────────────────────────

/// HTTP implementation of [`ChatStreamer`].
#[derive(Debug, Clone)]
pub struct ChatStreamClient {
    endpoint: ChatEndpoint,
    client: reqwest::Client,
    channel_size: usize,
}

impl ChatStreamClient {
    /// Create a client for `endpoint`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Config`] if the HTTP client cannot be built.
    pub fn new(endpoint: ChatEndpoint, config: &StreamConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| PipelineError::Config(format!("http client: {e}")))?;
        Ok(Self {
            endpoint,
            client,
            channel_size: config.channel_size.max(1),
        })
    }
}

#[async_trait]
impl ChatStreamer for ChatStreamClient {
    async fn open(
        &self,
        messages: Vec<ChatMessage>,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        let body = self.endpoint.request_body(&messages, true);
        let request = self
            .client
            .post(&self.endpoint.url)
            .bearer_auth(&self.endpoint.api_key)
            .json(&body)
            .send();

        let response = tokio::select! {
            () = cancel.cancelled() => {
                return Err(PipelineError::Cancelled("chat stream cancelled before open".into()));
            }
            sent = request => sent.map_err(|e| {
                warn!(provider = %self.endpoint.provider, error = %e, "chat stream request failed");
                PipelineError::StreamOpen(format!("chat stream request failed: {e}"))
            })?,
        };

        let status = response.status();
        if !status.is_success() {
            let text = error_body(response).await;
            warn!(provider = %self.endpoint.provider, %status, body = %text, "chat stream error");
            return Err(PipelineError::StreamOpen(format!(
                "chat stream failed: {status}: {text}"
            )));
        }

        let (tx, rx) = mpsc::channel(self.channel_size);
        tokio::spawn(pump_events(response.bytes_stream(), tx, cancel));
        Ok(rx)
    }
}

// ── Reader task ───────────────────────────────────────────────

/// Forward decoded events from `byte_stream` into `tx`, ending with one terminal event.
pub(crate) async fn pump_events<S, E>(
    byte_stream: S,
    tx: mpsc::Sender<StreamEvent>,
    cancel: CancellationToken,
) where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send,
    E: Display,
{
    let terminal = match read_until_terminal(byte_stream, &tx, &cancel).await {
        Some(event) => event,
        // Receiver is gone; nobody is listening for a terminal event.
        None => return,
    };
    if let StreamEvent::Error(ref e) = terminal {
        debug!(error = %e, "chat stream ended with error");
    }
    let _ = tx.send(terminal).await;
}

/// Returns the terminal event, or `None` if the receiver was dropped.
async fn read_until_terminal<S, E>(
    byte_stream: S,
    tx: &mpsc::Sender<StreamEvent>,
    cancel: &CancellationToken,
) -> Option<StreamEvent>
where
    S: Stream<Item = std::result::Result<Bytes, E>> + Send,
    E: Display,
{
    let mut byte_stream = std::pin::pin!(byte_stream);
    let mut decoder = SseFrameDecoder::new();

    loop {
        let next = tokio::select! {
            biased;
            () = cancel.cancelled() => return Some(cancelled()),
            next = byte_stream.next() => next,
        };

        let frames = match next {
            Some(Ok(chunk)) => match decoder.push(&chunk) {
                Ok(frames) => frames,
                Err(e) => {
                    warn!(error = %e, "chat stream line too long");
                    return Some(StreamEvent::Error(e));
                }
            },
            Some(Err(e)) => {
                return Some(StreamEvent::Error(PipelineError::StreamOpen(format!(
                    "stream read error: {e}"
                ))));
            }
            None => {
                // Body ended; a missing `[DONE]` still counts as done.
                if let Some(frame) = decoder.flush()
                    && let Some(terminal) = forward_frame(frame, tx, cancel).await?
                {
                    return Some(terminal);
                }
                return Some(StreamEvent::Done);
            }
        };

        for frame in frames {
            if let Some(terminal) = forward_frame(frame, tx, cancel).await? {
                return Some(terminal);
            }
        }
    }
}

/// Forward one frame's deltas.
///
/// Outer `None`: receiver dropped. Inner `Some`: the frame ended the stream.
async fn forward_frame(
    frame: SseFrame,
    tx: &mpsc::Sender<StreamEvent>,
    cancel: &CancellationToken,
) -> Option<Option<StreamEvent>> {
    let payload = match frame {
        SseFrame::Done => return Some(Some(StreamEvent::Done)),
        SseFrame::Data(payload) => payload,
    };
    let update = match decode_chunk(&payload) {
        Ok(Some(update)) => update,
        Ok(None) => return Some(None),
        Err(e) => {
            warn!(error = %e, "chat stream decode error");
            return Some(Some(StreamEvent::Error(e)));
        }
    };
    for delta in update.deltas {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return Some(Some(cancelled())),
            sent = tx.send(StreamEvent::Delta(delta)) => sent.ok()?,
        }
    }
    if update.finished {
        return Some(Some(StreamEvent::Done));
    }
    Some(None)
}

fn cancelled() -> StreamEvent {
    StreamEvent::Error(PipelineError::Cancelled("chat stream cancelled".into()))
}
