//! Error types for the conversation pipeline.
//!
//! Each variant carries a stable error code (SCREAMING_SNAKE_CASE) that is
//! included in the Display output and accessible via [`PipelineError::code()`].

/// Stable error codes for programmatic error handling.
pub mod error_codes {
    /// Chat endpoint unreachable, misconfigured, or returned non-2xx.
    pub const STREAM_OPEN: &str = "STREAM_OPEN";
    /// Malformed payload inside the chat event stream.
    pub const STREAM_DECODE: &str = "STREAM_DECODE";
    /// Speech synthesis call failed or returned empty audio.
    pub const SYNTHESIS_FAILED: &str = "SYNTHESIS_FAILED";
    /// External audio player failed.
    pub const PLAYBACK_FAILED: &str = "PLAYBACK_FAILED";
    /// Playback queue is at capacity.
    pub const QUEUE_FULL: &str = "QUEUE_FULL";
    /// Invalid or missing configuration.
    pub const CONFIG_INVALID: &str = "CONFIG_INVALID";
    /// Transcript or audio persistence failed.
    pub const STORAGE_FAILED: &str = "STORAGE_FAILED";
    /// The owning turn was cancelled.
    pub const CANCELLED: &str = "CANCELLED";
    /// Channel send/receive failed.
    pub const CHANNEL_CLOSED: &str = "CHANNEL_CLOSED";
    /// Filesystem or process I/O failed.
    pub const IO_ERROR: &str = "IO_ERROR";
}

/// Top-level error type for the conversation pipeline.
///
/// No variant is process-fatal: each one is recovered at the boundary of
/// the unit it belongs to (clip, block, or turn).
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The chat completion stream could not be opened.
    #[error("[{}] {}", error_codes::STREAM_OPEN, .0)]
    StreamOpen(String),

    /// A stream payload could not be decoded.
    #[error("[{}] {}", error_codes::STREAM_DECODE, .0)]
    StreamDecode(String),

    /// Text-to-speech synthesis failed for one block.
    #[error("[{}] {}", error_codes::SYNTHESIS_FAILED, .0)]
    Synthesis(String),

    /// Playing a clip failed.
    #[error("[{}] {}", error_codes::PLAYBACK_FAILED, .0)]
    Playback(String),

    /// The playback queue rejected a clip because it is full.
    #[error("[{}] {}", error_codes::QUEUE_FULL, .0)]
    QueueFull(String),

    /// Configuration error.
    #[error("[{}] {}", error_codes::CONFIG_INVALID, .0)]
    Config(String),

    /// Transcript or audio persistence error.
    #[error("[{}] {}", error_codes::STORAGE_FAILED, .0)]
    Storage(String),

    /// The turn owning this operation was cancelled.
    #[error("[{}] {}", error_codes::CANCELLED, .0)]
    Cancelled(String),

    /// Channel send/receive error.
    #[error("[{}] {}", error_codes::CHANNEL_CLOSED, .0)]
    Channel(String),

    /// I/O error.
    #[error("[{}] {}", error_codes::IO_ERROR, .0)]
    Io(#[from] std::io::Error),
}

/// What a failure costs the conversation when it is recovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureScope {
    /// The current turn ends with a fallback utterance.
    Turn,
    /// One speech block goes unvoiced; the synthesis queue advances.
    Block,
    /// Logged only; the conversation continues silently.
    Silent,
}

impl PipelineError {
    /// Returns the stable error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::StreamOpen(_) => error_codes::STREAM_OPEN,
            Self::StreamDecode(_) => error_codes::STREAM_DECODE,
            Self::Synthesis(_) => error_codes::SYNTHESIS_FAILED,
            Self::Playback(_) => error_codes::PLAYBACK_FAILED,
            Self::QueueFull(_) => error_codes::QUEUE_FULL,
            Self::Config(_) => error_codes::CONFIG_INVALID,
            Self::Storage(_) => error_codes::STORAGE_FAILED,
            Self::Cancelled(_) => error_codes::CANCELLED,
            Self::Channel(_) => error_codes::CHANNEL_CLOSED,
            Self::Io(_) => error_codes::IO_ERROR,
        }
    }

    /// Which unit of work this error terminates when it is recovered.
    pub fn scope(&self) -> FailureScope {
        match self {
            Self::StreamOpen(_) | Self::StreamDecode(_) | Self::Cancelled(_) => FailureScope::Turn,
            Self::Synthesis(_) => FailureScope::Block,
            Self::Playback(_)
            | Self::QueueFull(_)
            | Self::Config(_)
            | Self::Storage(_)
            | Self::Channel(_)
            | Self::Io(_) => FailureScope::Silent,
        }
    }
}

/// Convenience result type.
pub type Result<T> = std::result::Result<T, PipelineError>;
