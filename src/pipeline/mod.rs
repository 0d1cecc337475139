//! Turn orchestration and the conversation session task.

pub mod events;
pub mod session;
pub mod turn;

pub use events::{ConversationEvent, NoticeLevel, event_channel};
pub use session::{ConversationSession, SessionCommand, SessionHandle, StoreClipSink};
pub use turn::{ConversationProfile, FallbackReason, TurnOrchestrator, TurnOutcome, TurnState};
