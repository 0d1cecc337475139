//! Shared fakes for pipeline tests.
//!
//! Used by `pipeline::turn::tests` and `pipeline::session::tests`.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

use std::collections::VecDeque;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::error::{PipelineError, Result};
use crate::llm::message::{ChatMessage, Speaker, StreamEvent};
use crate::llm::stream::ChatStreamer;
use crate::speech::dispatch::ClipSink;
use crate::speech::synth::{SpeechSynthesizer, SynthesisJob};
use crate::storage::ConversationStore;

/// What one call to [`ScriptedStreamer::open`] does.
pub enum Script {
    /// Send these events, then close.
    Events(Vec<StreamEvent>),
    /// Send these deltas, then wait for cancellation.
    Hang(Vec<&'static str>),
    /// Fail to open.
    OpenError,
}

/// Build delta events.
pub fn deltas(items: &[&str]) -> Vec<StreamEvent> {
    items
        .iter()
        .map(|d| StreamEvent::Delta((*d).to_owned()))
        .collect()
}

/// Deltas followed by `Done`.
pub fn reply(items: &[&str]) -> Script {
    let mut events = deltas(items);
    events.push(StreamEvent::Done);
    Script::Events(events)
}

/// Chat streamer that plays back scripts in order. Runs out → open error.
#[derive(Default)]
pub struct ScriptedStreamer {
    scripts: Mutex<VecDeque<Script>>,
    /// Messages of every open call.
    pub requests: Mutex<Vec<Vec<ChatMessage>>>,
    /// Cancellation token of every open call.
    pub tokens: Mutex<Vec<CancellationToken>>,
}

impl ScriptedStreamer {
    /// Streamer with `scripts` queued.
    pub fn with(scripts: Vec<Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into()),
            ..Self::default()
        })
    }
}

#[async_trait]
impl ChatStreamer for ScriptedStreamer {
    async fn open(
        &self,
        messages: Vec<ChatMessage>,
        cancel: CancellationToken,
    ) -> Result<mpsc::Receiver<StreamEvent>> {
        self.requests.lock().unwrap().push(messages);
        self.tokens.lock().unwrap().push(cancel.clone());
        let script = self.scripts.lock().unwrap().pop_front();
        let (tx, rx) = mpsc::channel(16);
        match script {
            Some(Script::Events(events)) => {
                tokio::spawn(async move {
                    for event in events {
                        let _ = tx.send(event).await;
                    }
                });
            }
            Some(Script::Hang(deltas)) => {
                tokio::spawn(async move {
                    for delta in deltas {
                        let _ = tx.send(StreamEvent::Delta(delta.into())).await;
                    }
                    cancel.cancelled().await;
                    let _ = tx
                        .send(StreamEvent::Error(PipelineError::Cancelled(
                            "cancelled".into(),
                        )))
                        .await;
                });
            }
            Some(Script::OpenError) | None => {
                return Err(PipelineError::StreamOpen("connection refused".into()));
            }
        }
        Ok(rx)
    }
}

/// Synthesizer that records block texts and returns a tiny clip.
#[derive(Default)]
pub struct RecordingSynth {
    /// Texts synthesized, in order.
    pub calls: Mutex<Vec<String>>,
}

#[async_trait]
impl SpeechSynthesizer for RecordingSynth {
    async fn synthesize(&self, job: &SynthesisJob) -> Result<Bytes> {
        self.calls.lock().unwrap().push(job.text.clone());
        Ok(Bytes::from_static(b"RIFF"))
    }
}

/// Clip sink that drops everything.
pub struct DiscardSink;

#[async_trait]
impl ClipSink for DiscardSink {
    async fn deliver(&self, _job: &SynthesisJob, _audio: Bytes) -> Result<()> {
        Ok(())
    }
}

/// In-memory conversation store.
#[derive(Default)]
pub struct MemoryStore {
    /// Appended transcript lines.
    pub lines: Mutex<Vec<(Speaker, String)>>,
    /// Saved clip count.
    pub clips: Mutex<usize>,
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn append_message(&self, _id: &str, speaker: Speaker, text: &str) -> Result<()> {
        self.lines.lock().unwrap().push((speaker, text.to_owned()));
        Ok(())
    }

    async fn save_audio(&self, _id: &str, _audio: &[u8]) -> Result<String> {
        let mut clips = self.clips.lock().unwrap();
        *clips += 1;
        Ok(format!("{:03}.wav", *clips))
    }

    fn audio_path(&self, id: &str, filename: &str) -> PathBuf {
        PathBuf::from(id).join(filename)
    }
}
