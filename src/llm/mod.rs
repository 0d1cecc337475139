//! Chat model access.
//!
//! Talks to any OpenAI-compatible `/chat/completions` endpoint, either as a
//! single request ([`ChatClient`]) or as an incremental SSE stream
//! ([`ChatStreamClient`]) that yields [`StreamEvent`]s.

pub mod chat;
pub mod message;
pub mod prompts;
pub mod sse;
pub mod stream;

pub use chat::{ChatClient, ChatEndpoint};
pub use message::{ChatMessage, ConversationLine, Role, Speaker, StreamEvent};
pub use prompts::PromptLibrary;
pub use stream::{ChatStreamClient, ChatStreamer};
