//! Turn orchestrator: one Guest reply from model request to recorded utterance.
//!
//! ```text
//! Idle ──begin_turn──▶ AwaitingModel ──first Delta──▶ Streaming ──Done──▶ Idle
//!                          │                              │
//!                          └──open failure──▶ Idle        └──Error──▶ Idle
//! ```
//!
//! Opening the stream happens on a spawned task so the caller can keep
//! handling input while it waits. Each turn owns a cancellation token and
//! the receiving end of its event channel; cancelling a turn fires the token
//! and drops the receiver, so no event of that turn is ever handled again.
//!
//! Speech blocks go to the [`SynthesisDispatcher`] as soon as they close.
//! Synthesis and playback may outlive the turn.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::PipelineError;
use crate::llm::message::{ConversationLine, Speaker, StreamEvent};
use crate::llm::prompts::{PromptLibrary, guest_turn_messages};
use crate::llm::stream::ChatStreamer;
use crate::pipeline::events::{ConversationEvent, NoticeLevel};
use crate::speech::dispatch::SynthesisDispatcher;
use crate::speech::tags::{Extraction, SpeechTagExtractor};
use crate::storage::ConversationStore;

/// Guest line recorded when the model request cannot be opened.
pub const OPEN_FAILURE_LINE: &str =
    "Sorry, I'm having trouble connecting to the AI provider right now. Give me a moment and try again.";
/// Guest line recorded when the stream fails part way.
pub const STREAM_FAILURE_LINE: &str =
    "Sorry, looks like I'm having trouble reaching the AI right now. Want to try that again in a second?";
/// Guest line recorded when the model produced no visible text.
pub const BLANK_LINE: &str = "Um, I'm blanking for a second. Could you rephrase that?";

const OPEN_FAILURE_NOTICE: &str = "AI connection failed. Check your settings.";
const STREAM_FAILURE_NOTICE: &str = "AI stream error. Please try again.";

const TURN_CHANNEL_SIZE: usize = 32;

/// Where the orchestrator is in the current turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnState {
    /// No turn active.
    Idle,
    /// Request sent; no text yet.
    AwaitingModel,
    /// Receiving deltas.
    Streaming,
}

/// Why a turn ended with a stock line.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FallbackReason {
    /// The stream could not be opened.
    OpenFailed,
    /// The stream failed after opening.
    StreamFailed,
    /// The model finished without visible text.
    Blank,
}

impl FallbackReason {
    /// The Guest line recorded for this reason.
    pub fn line(self) -> &'static str {
        match self {
            Self::OpenFailed => OPEN_FAILURE_LINE,
            Self::StreamFailed => STREAM_FAILURE_LINE,
            Self::Blank => BLANK_LINE,
        }
    }

    fn notice(self) -> Option<&'static str> {
        match self {
            Self::OpenFailed => Some(OPEN_FAILURE_NOTICE),
            Self::StreamFailed => Some(STREAM_FAILURE_NOTICE),
            Self::Blank => None,
        }
    }
}

/// How a turn ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TurnOutcome {
    /// The model's reply was recorded.
    Completed {
        /// Turn number.
        turn_id: u64,
        /// Recorded utterance.
        text: String,
        /// Speech blocks extracted during the turn.
        blocks: usize,
    },
    /// A stock line was recorded instead.
    Fallback {
        /// Turn number.
        turn_id: u64,
        /// What went wrong.
        reason: FallbackReason,
    },
    /// The turn was cancelled; nothing was recorded.
    Cancelled {
        /// Turn number.
        turn_id: u64,
    },
}

/// Input to the orchestrator for the active turn.
#[derive(Debug)]
pub enum TurnInput {
    /// The model request could not be opened.
    OpenFailed(PipelineError),
    /// An event from the open stream.
    Event(StreamEvent),
}

/// Who the Guest is and where its conversation is stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationProfile {
    /// Storage id.
    pub conversation_id: String,
    /// Guest persona description.
    pub persona: String,
    /// Episode topic.
    pub topic: String,
}

struct ActiveTurn {
    id: u64,
    cancel: CancellationToken,
    rx: mpsc::Receiver<TurnInput>,
    extractor: SpeechTagExtractor,
    transcript: String,
    blocks: usize,
}

/// Coordinates stream, extractor, dispatcher and persistence for Guest turns.
pub struct TurnOrchestrator {
    profile: ConversationProfile,
    streamer: Arc<dyn ChatStreamer>,
    prompts: PromptLibrary,
    dispatcher: SynthesisDispatcher,
    store: Arc<dyn ConversationStore>,
    events: broadcast::Sender<ConversationEvent>,
    history: Vec<ConversationLine>,
    state: TurnState,
    active: Option<ActiveTurn>,
    next_turn_id: u64,
}

impl std::fmt::Debug for TurnOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TurnOrchestrator")
            .field("profile", &self.profile)
            .field("state", &self.state)
            .field("history_len", &self.history.len())
            .finish_non_exhaustive()
    }
}

impl TurnOrchestrator {
    /// Create an idle orchestrator with empty history and built-in prompts.
    pub fn new(
        profile: ConversationProfile,
        streamer: Arc<dyn ChatStreamer>,
        dispatcher: SynthesisDispatcher,
        store: Arc<dyn ConversationStore>,
        events: broadcast::Sender<ConversationEvent>,
    ) -> Self {
        Self {
            profile,
            streamer,
            prompts: PromptLibrary::builtin(),
            dispatcher,
            store,
            events,
            history: Vec::new(),
            state: TurnState::Idle,
            active: None,
            next_turn_id: 1,
        }
    }

    /// Use `prompts` for the system prompt.
    #[must_use]
    pub fn with_prompts(mut self, prompts: PromptLibrary) -> Self {
        self.prompts = prompts;
        self
    }

    /// Resume from previously recorded history.
    #[must_use]
    pub fn with_history(mut self, history: Vec<ConversationLine>) -> Self {
        self.history = history;
        self
    }

    /// Current state.
    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Conversation history, oldest first.
    pub fn history(&self) -> &[ConversationLine] {
        &self.history
    }

    /// The conversation this orchestrator serves.
    pub fn profile(&self) -> &ConversationProfile {
        &self.profile
    }

    /// The synthesis dispatcher fed by this orchestrator.
    pub fn dispatcher(&self) -> &SynthesisDispatcher {
        &self.dispatcher
    }

    /// Id of the active turn, if any.
    pub fn active_turn(&self) -> Option<u64> {
        self.active.as_ref().map(|t| t.id)
    }

    /// Visible text of the active turn so far.
    pub fn partial_transcript(&self) -> Option<&str> {
        self.active.as_ref().map(|t| t.transcript.as_str())
    }

    fn emit(&self, event: ConversationEvent) {
        let _ = self.events.send(event);
    }

    /// Record a Host message in history and storage.
    ///
    /// Returns `false` for blank text, which is not recorded.
    pub async fn record_host_message(&mut self, text: &str) -> bool {
        let text = text.trim();
        if text.is_empty() {
            return false;
        }
        self.history.push(ConversationLine::new(Speaker::Host, text));
        self.persist(Speaker::Host, text).await;
        self.emit(ConversationEvent::HostMessage {
            text: text.to_owned(),
        });
        true
    }

    async fn persist(&self, speaker: Speaker, text: &str) {
        if let Err(e) = self
            .store
            .append_message(&self.profile.conversation_id, speaker, text)
            .await
        {
            warn!(
                conversation_id = %self.profile.conversation_id,
                %speaker,
                error = %e,
                "failed to persist message"
            );
        }
    }

    /// Start a new Guest turn, cancelling any active one first.
    ///
    /// Returns the new turn id. Must be called from within a Tokio runtime.
    pub fn begin_turn(&mut self) -> u64 {
        if let Some(turn_id) = self.cancel_turn() {
            debug!(turn_id, "previous turn cancelled by new turn");
        }
        self.dispatcher.reset();

        let turn_id = self.next_turn_id;
        self.next_turn_id += 1;
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(TURN_CHANNEL_SIZE);

        match self.prompts.system_prompt(&self.profile.persona, &self.profile.topic) {
            Ok(system) => {
                let messages = guest_turn_messages(system, &self.history, &self.profile.topic);
                tokio::spawn(forward_stream(
                    Arc::clone(&self.streamer),
                    messages,
                    cancel.clone(),
                    tx,
                ));
            }
            Err(e) => {
                // Channel is fresh, so there is room for this one message.
                let _ = tx.try_send(TurnInput::OpenFailed(e));
            }
        }

        self.active = Some(ActiveTurn {
            id: turn_id,
            cancel,
            rx,
            extractor: SpeechTagExtractor::new(),
            transcript: String::new(),
            blocks: 0,
        });
        self.state = TurnState::AwaitingModel;
        info!(conversation_id = %self.profile.conversation_id, turn_id, "guest turn started");
        self.emit(ConversationEvent::TurnStarted { turn_id });
        turn_id
    }

    /// Cancel the active turn, if any. Nothing from it is recorded.
    ///
    /// Returns the cancelled turn id.
    pub fn cancel_turn(&mut self) -> Option<u64> {
        let turn = self.active.take()?;
        turn.cancel.cancel();
        self.state = TurnState::Idle;
        debug!(turn_id = turn.id, partial_len = turn.transcript.len(), "turn cancelled");
        self.emit(ConversationEvent::TurnIdle { turn_id: turn.id });
        Some(turn.id)
    }

    /// Wait for the next input of the active turn.
    ///
    /// Never resolves while no turn is active. A channel that closes without
    /// a terminal event yields a stream error.
    pub async fn next_input(&mut self) -> TurnInput {
        let Some(turn) = self.active.as_mut() else {
            return std::future::pending().await;
        };
        match turn.rx.recv().await {
            Some(input) => input,
            None => TurnInput::Event(StreamEvent::Error(PipelineError::Channel(
                "chat stream closed without a terminal event".into(),
            ))),
        }
    }

    /// Apply one input to the active turn. Returns the outcome if the turn ended.
    pub async fn handle_input(&mut self, input: TurnInput) -> Option<TurnOutcome> {
        let turn_id = self.active.as_ref()?.id;
        match input {
            TurnInput::OpenFailed(e) => {
                warn!(turn_id, error = %e, "chat stream open failed");
                Some(self.finish_with_fallback(FallbackReason::OpenFailed).await)
            }
            TurnInput::Event(StreamEvent::Delta(delta)) => {
                self.state = TurnState::Streaming;
                let step = self.active.as_mut()?.extractor.consume(&delta);
                self.apply_extraction(turn_id, step);
                None
            }
            TurnInput::Event(StreamEvent::Done) => Some(self.finish_done().await),
            TurnInput::Event(StreamEvent::Error(PipelineError::Cancelled(_))) => {
                self.cancel_turn();
                Some(TurnOutcome::Cancelled { turn_id })
            }
            TurnInput::Event(StreamEvent::Error(e)) => {
                warn!(turn_id, error = %e, "chat stream failed");
                if let Some(turn) = &self.active {
                    turn.cancel.cancel();
                }
                Some(self.finish_with_fallback(FallbackReason::StreamFailed).await)
            }
        }
    }

    /// Begin a turn and drive it to its end.
    pub async fn run_turn(&mut self) -> TurnOutcome {
        self.begin_turn();
        loop {
            let input = self.next_input().await;
            if let Some(outcome) = self.handle_input(input).await {
                return outcome;
            }
        }
    }

    fn apply_extraction(&mut self, turn_id: u64, step: Extraction) {
        if !step.visible.is_empty() {
            if let Some(turn) = self.active.as_mut() {
                turn.transcript.push_str(&step.visible);
            }
            self.emit(ConversationEvent::TranscriptDelta {
                turn_id,
                text: step.visible,
            });
        }
        if step.blocks.is_empty() {
            return;
        }
        if let Some(turn) = self.active.as_mut() {
            turn.blocks += step.blocks.len();
        }
        for block in &step.blocks {
            debug!(turn_id, block = %block, "speech block extracted");
            self.emit(ConversationEvent::SpeechBlock {
                turn_id,
                text: block.clone(),
            });
        }
        self.dispatcher.enqueue(step.blocks);
    }

    async fn finish_done(&mut self) -> TurnOutcome {
        let Some(turn_id) = self.active_turn() else {
            return TurnOutcome::Cancelled { turn_id: 0 };
        };
        let tail = match self.active.as_mut() {
            Some(turn) => turn.extractor.finalize(),
            None => Extraction::default(),
        };
        self.apply_extraction(turn_id, tail);

        let Some(turn) = self.active.take() else {
            return TurnOutcome::Cancelled { turn_id };
        };
        let text = turn.transcript.trim().to_owned();
        if text.is_empty() {
            self.active = Some(turn);
            return self.finish_with_fallback(FallbackReason::Blank).await;
        }

        self.history.push(ConversationLine::new(Speaker::Guest, text.clone()));
        self.persist(Speaker::Guest, &text).await;
        self.state = TurnState::Idle;
        info!(
            conversation_id = %self.profile.conversation_id,
            turn_id,
            blocks = turn.blocks,
            "guest turn complete"
        );
        self.emit(ConversationEvent::GuestUtterance {
            turn_id,
            text: text.clone(),
            fallback: false,
        });
        self.emit(ConversationEvent::TurnIdle { turn_id });
        TurnOutcome::Completed {
            turn_id,
            text,
            blocks: turn.blocks,
        }
    }

    async fn finish_with_fallback(&mut self, reason: FallbackReason) -> TurnOutcome {
        let turn_id = self.active.take().map_or(0, |t| t.id);
        let line = reason.line();
        self.history.push(ConversationLine::new(Speaker::Guest, line));
        self.persist(Speaker::Guest, line).await;
        self.state = TurnState::Idle;
        info!(turn_id, ?reason, "guest turn ended with fallback line");
        self.emit(ConversationEvent::GuestUtterance {
            turn_id,
            text: line.to_owned(),
            fallback: true,
        });
        if let Some(notice) = reason.notice() {
            self.emit(ConversationEvent::Notice {
                level: NoticeLevel::Error,
                text: notice.to_owned(),
            });
        }
        self.emit(ConversationEvent::TurnIdle { turn_id });
        TurnOutcome::Fallback { turn_id, reason }
    }
}

/// Open the stream and relay its events until a terminal one or until the
/// orchestrator drops its receiver.
async fn forward_stream(
    streamer: Arc<dyn ChatStreamer>,
    messages: Vec<crate::llm::message::ChatMessage>,
    cancel: CancellationToken,
    tx: mpsc::Sender<TurnInput>,
) {
    let mut events = match streamer.open(messages, cancel).await {
        Ok(events) => events,
        Err(e) => {
            let _ = tx.send(TurnInput::OpenFailed(e)).await;
            return;
        }
    };
    while let Some(event) = events.recv().await {
        let terminal = event.is_terminal();
        if tx.send(TurnInput::Event(event)).await.is_err() || terminal {
            break;
        }
    }
}
