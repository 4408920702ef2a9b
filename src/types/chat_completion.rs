use serde::{Deserialize, Serialize};

use crate::types::ChatMessage;

/// One alternative in a complete (non-streaming) response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Choice {
    /// The message the model produced.
    pub message: ChatMessage,

    /// Why the model stopped, when the server says.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// A complete (non-streaming) chat completion response.
///
/// Fields the server sends beyond these are ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatCompletion {
    /// Server-assigned identifier.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// The alternatives; only the first is used.
    pub choices: Vec<Choice>,
}

impl ChatCompletion {
    /// The content of the first choice, if there is one.
    pub fn first_content(&self) -> Option<&str> {
        self.choices
            .first()
            .map(|choice| choice.message.content.as_str())
    }
}
