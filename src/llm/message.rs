//! Message types sent to and received from chat-completion providers.
//!
//! # Examples
//!
//! ```
//! use vibecast::llm::message::{ChatMessage, Role};
//!
//! let msg = ChatMessage::user("What got you into radio?");
//! assert_eq!(msg.role, Role::User);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::PipelineError;

/// The role of a message in a conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System instructions.
    System,
    /// Host input.
    User,
    /// Guest (model) output.
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// An OpenAI-compatible chat message. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Who said it.
    pub role: Role,
    /// What was said.
    pub content: String,
}

impl ChatMessage {
    /// Create a message with an explicit role.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    /// Create a system message.
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// Create a user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    /// Create an assistant message.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Who spoke a line of the conversation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Speaker {
    /// The human host.
    Host,
    /// The AI guest.
    Guest,
}

impl Speaker {
    /// The chat role this speaker's lines are sent as.
    pub fn role(self) -> Role {
        match self {
            Self::Host => Role::User,
            Self::Guest => Role::Assistant,
        }
    }

    /// Parse a transcript label (`Host` / `Guest`).
    pub fn from_label(label: &str) -> Option<Self> {
        match label.trim() {
            "Host" => Some(Self::Host),
            "Guest" => Some(Self::Guest),
            _ => None,
        }
    }
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Host => write!(f, "Host"),
            Self::Guest => write!(f, "Guest"),
        }
    }
}

/// One line of conversation history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationLine {
    /// Who said it.
    pub speaker: Speaker,
    /// What was said.
    pub content: String,
}

impl ConversationLine {
    /// Create a history line.
    pub fn new(speaker: Speaker, content: impl Into<String>) -> Self {
        Self {
            speaker,
            content: content.into(),
        }
    }

    /// Convert to the chat message sent to the model.
    pub fn to_chat(&self) -> ChatMessage {
        ChatMessage::new(self.speaker.role(), self.content.clone())
    }
}

/// One event from a streaming chat completion.
///
/// `Done` and `Error` are terminal: nothing follows them on the same stream.
#[derive(Debug)]
pub enum StreamEvent {
    /// A fragment of generated text.
    Delta(String),
    /// The model finished normally.
    Done,
    /// The stream failed or was cancelled.
    Error(PipelineError),
}

impl StreamEvent {
    /// Whether this event ends the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error(_))
    }
}
