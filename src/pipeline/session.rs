//! Long-lived conversation task.
//!
//! [`ConversationSession::spawn`] moves a [`TurnOrchestrator`] onto its own
//! task. Front ends talk to it only through a [`SessionHandle`]: commands go
//! in over an mpsc channel and [`ConversationEvent`]s come out over a
//! broadcast channel, so input handling never waits on the model, the
//! speech endpoint, or the audio player.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::audio::playback::PlaybackQueue;
use crate::error::{PipelineError, Result};
use crate::pipeline::events::{ConversationEvent, NoticeLevel};
use crate::pipeline::turn::TurnOrchestrator;
use crate::speech::dispatch::ClipSink;
use crate::speech::synth::SynthesisJob;
use crate::storage::ConversationStore;

const COMMAND_CHANNEL_SIZE: usize = 16;

/// Notice shown when a Host message cuts off the Guest.
pub const INTERRUPTED_NOTICE: &str = "Guest interrupted.";

/// Requests from the front end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionCommand {
    /// The Host said something; the Guest answers.
    HostMessage(String),
    /// Let the Guest speak without Host input (episode opening).
    StartGuest,
    /// Stop the conversation after pending audio has played.
    Exit,
}

/// Saves synthesized clips and queues them for playback.
pub struct StoreClipSink {
    conversation_id: String,
    store: Arc<dyn ConversationStore>,
    playback: PlaybackQueue,
    events: broadcast::Sender<ConversationEvent>,
}

impl StoreClipSink {
    /// Create a sink for one conversation.
    pub fn new(
        conversation_id: impl Into<String>,
        store: Arc<dyn ConversationStore>,
        playback: PlaybackQueue,
        events: broadcast::Sender<ConversationEvent>,
    ) -> Self {
        Self {
            conversation_id: conversation_id.into(),
            store,
            playback,
            events,
        }
    }
}

#[async_trait]
impl ClipSink for StoreClipSink {
    async fn deliver(&self, job: &SynthesisJob, audio: Bytes) -> Result<()> {
        let filename = self.store.save_audio(&self.conversation_id, &audio).await?;
        let path = self.store.audio_path(&self.conversation_id, &filename);
        self.playback.enqueue(path.clone())?;
        debug!(path = %path.display(), block = %job.text, "clip queued");
        let _ = self.events.send(ConversationEvent::ClipQueued { path });
        Ok(())
    }
}

/// Handle to a running conversation session.
#[derive(Debug)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    events: broadcast::Sender<ConversationEvent>,
    task: JoinHandle<()>,
}

impl SessionHandle {
    /// Subscribe to conversation events.
    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.events.subscribe()
    }

    /// Send a command.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Channel`] if the session has stopped.
    pub async fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands
            .send(command)
            .await
            .map_err(|_| PipelineError::Channel("conversation session stopped".into()))
    }

    /// Send a Host message.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Channel`] if the session has stopped.
    pub async fn host_message(&self, text: impl Into<String>) -> Result<()> {
        self.send(SessionCommand::HostMessage(text.into())).await
    }

    /// Ask the Guest to speak first.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Channel`] if the session has stopped.
    pub async fn start_guest(&self) -> Result<()> {
        self.send(SessionCommand::StartGuest).await
    }

    /// Stop the session and wait until its audio has drained.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Channel`] if the session task panicked.
    pub async fn exit(self) -> Result<()> {
        // Already stopped is fine; the join below still waits for teardown.
        let _ = self.commands.send(SessionCommand::Exit).await;
        self.task
            .await
            .map_err(|e| PipelineError::Channel(format!("conversation session failed: {e}")))
    }
}

/// Runs one conversation.
pub struct ConversationSession {
    orchestrator: TurnOrchestrator,
    playback: PlaybackQueue,
    commands: mpsc::Receiver<SessionCommand>,
    events: broadcast::Sender<ConversationEvent>,
}

impl ConversationSession {
    /// Start the session task. `events` must be the sender the orchestrator emits on.
    pub fn spawn(
        orchestrator: TurnOrchestrator,
        playback: PlaybackQueue,
        events: broadcast::Sender<ConversationEvent>,
    ) -> SessionHandle {
        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_SIZE);
        let session = Self {
            orchestrator,
            playback,
            commands: rx,
            events: events.clone(),
        };
        let task = tokio::spawn(session.run());
        SessionHandle {
            commands: tx,
            events,
            task,
        }
    }

    async fn run(mut self) {
        let conversation_id = self.orchestrator.profile().conversation_id.clone();
        info!(%conversation_id, "conversation session started");
        loop {
            tokio::select! {
                command = self.commands.recv() => match command {
                    Some(SessionCommand::HostMessage(text)) => {
                        if text.trim().is_empty() {
                            debug!("ignoring blank host message");
                            continue;
                        }
                        if let Some(turn_id) = self.orchestrator.cancel_turn() {
                            info!(turn_id, "host interrupted guest turn");
                            let _ = self.events.send(ConversationEvent::Notice {
                                level: NoticeLevel::Info,
                                text: INTERRUPTED_NOTICE.to_owned(),
                            });
                        }
                        if self.orchestrator.record_host_message(&text).await {
                            self.orchestrator.begin_turn();
                        }
                    }
                    Some(SessionCommand::StartGuest) => {
                        self.orchestrator.begin_turn();
                    }
                    Some(SessionCommand::Exit) | None => break,
                },
                input = self.orchestrator.next_input() => {
                    if let Some(outcome) = self.orchestrator.handle_input(input).await {
                        debug!(?outcome, "turn finished");
                    }
                }
            }
        }
        self.shutdown().await;
        info!(%conversation_id, "conversation session stopped");
    }

    async fn shutdown(&mut self) {
        if let Some(turn_id) = self.orchestrator.cancel_turn() {
            info!(turn_id, "cancelled in-flight turn on exit");
        }
        self.orchestrator.dispatcher().wait_idle().await;
        self.playback.drain().await;
    }
}
