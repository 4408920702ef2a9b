//! Logging trait for chat completion traffic.
//!
//! This module provides the [`ClientLogger`] trait that allows users to capture
//! and log all API interactions passing through the [`Client`](crate::Client).

use crate::types::{ChatCompletion, ChatRequest};

/// A trait for logging chat completion traffic.
///
/// Implement this trait to capture and record every request and what came back,
/// including each raw line of a streamed response.
///
/// # Example
///
/// ```rust,ignore
/// use parley::{ChatCompletion, ChatRequest, ClientLogger};
/// use std::io::Write;
/// use std::sync::Mutex;
///
/// struct FileLogger {
///     file: Mutex<std::fs::File>,
/// }
///
/// impl ClientLogger for FileLogger {
///     fn log_request(&self, request: &ChatRequest) {
///         let mut file = self.file.lock().unwrap();
///         writeln!(file, "Request: {}", serde_json::to_string(request).unwrap()).unwrap();
///     }
///
///     fn log_response(&self, completion: &ChatCompletion) {
///         let mut file = self.file.lock().unwrap();
///         writeln!(file, "Response: {}", serde_json::to_string(completion).unwrap()).unwrap();
///     }
///
///     fn log_stream_line(&self, line: &str) {
///         let mut file = self.file.lock().unwrap();
///         writeln!(file, "Stream line: {line}").unwrap();
///     }
///
///     fn log_stream_complete(&self, text: &str) {
///         let mut file = self.file.lock().unwrap();
///         writeln!(file, "Stream complete: {text}").unwrap();
///     }
/// }
/// ```
pub trait ClientLogger: Send + Sync {
    /// Log a request just before it is sent, streamed or not.
    fn log_request(&self, request: &ChatRequest);

    /// Log a complete response from a non-streaming call.
    ///
    /// This method is called once per successfully decoded response.
    fn log_response(&self, completion: &ChatCompletion);

    /// Log one raw line of a streamed response.
    ///
    /// Called for every line, including blank lines and lines that carry no text.
    fn log_stream_line(&self, line: &str);

    /// Log the text accumulated from a stream that ended without error.
    fn log_stream_complete(&self, text: &str);
}
