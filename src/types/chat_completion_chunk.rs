use serde::{Deserialize, Serialize};

/// The incremental part of a streamed choice.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Delta {
    /// Present on the first chunk of a response.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,

    /// The next piece of text, absent on role-only and final chunks.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
}

/// One alternative in a streamed chunk.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChunkChoice {
    /// What changed in this chunk.
    pub delta: Delta,

    /// Set on the last chunk of a choice.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

/// The JSON payload of one `data:` line in a streamed response.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatCompletionChunk {
    /// The alternatives; only the first is used.
    pub choices: Vec<ChunkChoice>,
}

impl ChatCompletionChunk {
    /// The content delta of the first choice, if it carries one.
    pub fn into_content(self) -> Option<String> {
        self.choices.into_iter().next()?.delta.content
    }
}
