//! Inbound chat request

use serde::{Deserialize, Serialize};

use super::message::Message;

/// A visitor's chat message plus whatever history their client kept.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    #[serde(default)]
    pub conversation_history: Vec<Message>,
}

impl ChatRequest {
    /// Create a stateless request (no history).
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            conversation_history: Vec::new(),
        }
    }

    /// Attach prior turns.
    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.conversation_history = history;
        self
    }

    /// Stateless requests are the only ones eligible for the response cache.
    pub fn is_stateless(&self) -> bool {
        self.conversation_history.is_empty()
    }
}
