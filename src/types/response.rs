//! Reply and streaming event types

use serde::{Deserialize, Serialize};

/// Non-streaming chat reply
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatReply {
    pub response: String,
    pub model: String,
    /// Served from the response cache rather than the backend.
    #[serde(skip)]
    pub cached: bool,
}

/// Events emitted during a streamed reply.
///
/// Serialised as `{"type": "fragment", "text": "..."}` and so on; every
/// stream ends with exactly one `done`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChatEvent {
    /// Incremental text
    Fragment { text: String },

    /// Failure after streaming began
    Error { message: String },

    /// Stream complete
    Done { model: String },
}

impl ChatEvent {
    pub fn fragment(text: impl Into<String>) -> Self {
        ChatEvent::Fragment { text: text.into() }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, ChatEvent::Done { .. })
    }
}
