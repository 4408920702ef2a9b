//! Wire format for chat completion requests and responses.
//!
//! Requests are JSON objects with `model`, `messages` and `stream` keys.  Complete responses are
//! JSON objects whose first choice carries the assistant message.  Streamed responses are
//! line-oriented: each `data:` line carries a [`ChatCompletionChunk`] or the `[DONE]` marker, and
//! every other line is ignored.

use crate::error::{Error, Result};
use crate::types::{ChatCompletion, ChatCompletionChunk, ChatRequest, Message, Model};

/// Payload of the line that ends a stream.
pub const DONE_MARKER: &str = "[DONE]";

/// What one line of a streamed response means.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A piece of assistant text to append.
    Fragment(String),
    /// The server finished the response.
    Done,
}

/// Build the request for `transcript`, in order, with the given mode.
pub fn build_request(model: &Model, transcript: &[Message], streaming: bool) -> ChatRequest {
    ChatRequest::new(model.clone(), transcript, streaming)
}

/// Serialize a request body.
pub fn encode(request: &ChatRequest) -> Result<Vec<u8>> {
    serde_json::to_vec(request).map_err(|e| {
        Error::encoding(
            format!("could not encode chat request: {e}"),
            Some(Box::new(e)),
        )
    })
}

/// Build and serialize the request body for `transcript`.
pub fn encode_request(model: &Model, transcript: &[Message], streaming: bool) -> Result<Vec<u8>> {
    encode(&build_request(model, transcript, streaming))
}

/// Parse a complete response body.
pub fn decode_completion(bytes: &[u8]) -> Result<ChatCompletion> {
    serde_json::from_slice(bytes).map_err(|e| {
        Error::serialization(
            format!("could not decode chat completion: {e}"),
            Some(Box::new(e)),
        )
    })
}

/// Extract the assistant text from a parsed response.
pub fn completion_content(completion: &ChatCompletion) -> Result<String> {
    completion
        .first_content()
        .map(str::to_string)
        .ok_or_else(|| Error::serialization("chat completion contained no choices", None))
}

/// Parse a complete response body and return the first choice's content.
pub fn decode_complete_response(bytes: &[u8]) -> Result<String> {
    completion_content(&decode_completion(bytes)?)
}

/// Interpret one line of a streamed response.
///
/// Returns `None` for anything that carries no text: blank and comment lines, lines whose label
/// is not `data`, malformed JSON, and chunks without content.
pub fn decode_stream_line(line: &str) -> Option<StreamEvent> {
    let (label, value) = line.split_once(':')?;
    if label != "data" || value.is_empty() {
        return None;
    }
    let payload = value.trim();
    if payload == DONE_MARKER {
        return Some(StreamEvent::Done);
    }
    serde_json::from_str::<ChatCompletionChunk>(payload)
        .ok()?
        .into_content()
        .map(StreamEvent::Fragment)
}
