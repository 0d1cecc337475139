//! Events the conversation emits for front ends and observers.
//!
//! Payloads are small so the pipeline never waits on a slow subscriber;
//! a lagging receiver simply misses events.

use std::path::PathBuf;

use tokio::sync::broadcast;

/// Severity of a transient notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeLevel {
    /// Informational.
    Info,
    /// Something failed but the conversation carries on.
    Error,
}

/// What the conversation is doing "right now".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConversationEvent {
    /// A Guest turn started.
    TurnStarted {
        /// Monotonic turn number within the session.
        turn_id: u64,
    },
    /// Newly visible Guest text, in stream order.
    TranscriptDelta {
        /// Turn the text belongs to.
        turn_id: u64,
        /// Text to append.
        text: String,
    },
    /// A completed Guest utterance was recorded.
    GuestUtterance {
        /// Turn that produced it.
        turn_id: u64,
        /// Final text.
        text: String,
        /// Whether this is a stock fallback line rather than model output.
        fallback: bool,
    },
    /// A Host message was recorded.
    HostMessage {
        /// Message text.
        text: String,
    },
    /// A speech block was handed to synthesis.
    SpeechBlock {
        /// Turn that produced it.
        turn_id: u64,
        /// Block text.
        text: String,
    },
    /// A synthesized clip was saved and queued for playback.
    ClipQueued {
        /// Clip location.
        path: PathBuf,
    },
    /// A transient notification.
    Notice {
        /// Severity.
        level: NoticeLevel,
        /// Message for the Host.
        text: String,
    },
    /// The turn finished and the orchestrator is idle.
    TurnIdle {
        /// Turn that finished.
        turn_id: u64,
    },
}

/// Capacity of the event broadcast channel.
pub const EVENT_CHANNEL_SIZE: usize = 256;

/// Create the event channel.
pub fn event_channel() -> (broadcast::Sender<ConversationEvent>, broadcast::Receiver<ConversationEvent>) {
    broadcast::channel(EVENT_CHANNEL_SIZE)
}
