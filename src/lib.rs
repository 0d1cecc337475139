//! Vibecast: simulated podcast conversations with a voiced AI guest.
//!
//! The crate is the real-time response pipeline behind one Guest turn:
//! Chat stream → speech tags → synthesis → playback
//!
//! # Architecture
//!
//! Independent stages connected by async channels:
//! - **Stream reader**: decodes an OpenAI-compatible SSE chat stream into deltas
//! - **Speech tags**: pulls `<speech>…</speech>` spans out of arbitrarily split deltas
//! - **Synthesis dispatcher**: voices spans one at a time, in order
//! - **Playback queue**: plays saved clips sequentially through an external player
//! - **Turn orchestrator**: ties one Guest turn together, including cancellation
//!   and fallback lines
//! - **Session**: runs the orchestrator on its own task behind a command channel

pub mod audio;
pub mod config;
pub mod error;
pub mod llm;
pub mod pipeline;
pub mod speech;
pub mod storage;
pub mod vibecast_dirs;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::VibecastConfig;
pub use error::{PipelineError, Result};
pub use pipeline::{ConversationEvent, ConversationSession, SessionHandle, TurnOrchestrator};
