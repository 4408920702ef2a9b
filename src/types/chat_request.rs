use serde::{Deserialize, Serialize};

use crate::types::{Message, Model, Role};

/// A message as it is sent to, and returned from, the chat completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    /// The role of the message.
    pub role: Role,

    /// The content of the message.
    pub content: String,
}

impl ChatMessage {
    /// Create a new `ChatMessage`.
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

impl From<&Message> for ChatMessage {
    fn from(message: &Message) -> Self {
        Self::new(message.role, message.content.clone())
    }
}

/// The body of a chat completion request.
///
/// Fields are serialized in declaration order: `model`, `messages`, `stream`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatRequest {
    /// The model that will complete the conversation.
    pub model: Model,

    /// The full conversation so far, oldest first.
    pub messages: Vec<ChatMessage>,

    /// Whether the response should be delivered as an event stream.
    pub stream: bool,
}

impl ChatRequest {
    /// Create a new `ChatRequest` from a transcript.
    pub fn new(model: Model, messages: &[Message], stream: bool) -> Self {
        Self {
            model,
            messages: messages.iter().map(ChatMessage::from).collect(),
            stream,
        }
    }
}
