//! Configuration types for the chat application.
//!
//! This module provides CLI argument parsing via `arrrg` and configuration
//! structures for controlling chat behavior.

use std::sync::Arc;
use std::time::Duration;

use arrrg_derive::CommandLine;

use crate::client::Client;
use crate::client_logger::ClientLogger;
use crate::error::Result;
use crate::transport::{DEFAULT_API_URL, HttpTransport};
use crate::types::Model;

/// Default seconds to wait for a complete response or for response headers.
const DEFAULT_TIMEOUT_SECS: u64 = 60;

/// Default seconds to wait between lines of a streamed response.
const DEFAULT_IDLE_TIMEOUT_SECS: u64 = 60;

/// Command-line arguments for the parley-chat tool.
#[derive(CommandLine, Debug, Default, PartialEq, Eq)]
pub struct ChatArgs {
    /// Model to use for chat.
    #[arrrg(optional, "Model to use (default: gpt-3.5-turbo)", "MODEL")]
    pub model: Option<String>,

    /// System prompt to set context for the conversation.
    #[arrrg(optional, "System prompt for the conversation", "PROMPT")]
    pub system: Option<String>,

    /// Base URL of an OpenAI-compatible API.
    #[arrrg(optional, "API base URL (default: https://api.openai.com/v1/)", "URL")]
    pub base_url: Option<String>,

    #[arrrg(optional, "Request timeout in seconds (default: 60)", "SECONDS")]
    pub timeout: Option<u64>,

    #[arrrg(optional, "Seconds to wait between streamed lines (default: 60)", "SECONDS")]
    pub idle_timeout: Option<u64>,

    /// Wait for whole responses instead of streaming them.
    #[arrrg(flag, "Disable streaming responses")]
    pub no_stream: bool,

    /// Disable ANSI colors and styles.
    #[arrrg(flag, "Disable ANSI colors/styles")]
    pub no_color: bool,

    /// Echo requests and responses to stderr.
    #[arrrg(flag, "Log request and response bodies to stderr")]
    pub verbose: bool,
}

/// Configuration for a chat session.
///
/// This struct holds the resolved configuration values after processing
/// command-line arguments with appropriate defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatConfig {
    /// The model to use for generating responses.
    pub model: Model,

    /// Optional system prompt, seeded as the first message of the transcript.
    pub system_prompt: Option<String>,

    /// Whether responses are streamed fragment by fragment.
    pub streaming: bool,

    /// Base URL of the chat completion API.
    pub base_url: String,

    /// Bound on a complete request, and on waiting for a stream's response headers.
    pub request_timeout: Duration,

    /// Bound on the gap between consecutive lines of a stream.
    pub idle_timeout: Duration,

    /// Whether to use ANSI colors and styles in output.
    pub use_color: bool,

    /// Whether to log traffic to stderr.
    pub verbose: bool,
}

impl ChatConfig {
    /// Creates a new ChatConfig with default values.
    ///
    /// Defaults:
    /// - Model: gpt-3.5-turbo
    /// - Streaming: enabled
    /// - Timeouts: 60 seconds
    /// - Color: enabled
    pub fn new() -> Self {
        Self {
            model: Model::default(),
            system_prompt: None,
            streaming: true,
            base_url: DEFAULT_API_URL.to_string(),
            request_timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
            idle_timeout: Duration::from_secs(DEFAULT_IDLE_TIMEOUT_SECS),
            use_color: true,
            verbose: false,
        }
    }

    /// Sets the model to use.
    pub fn with_model(mut self, model: Model) -> Self {
        self.model = model;
        self
    }

    /// Sets the system prompt.
    pub fn with_system_prompt(mut self, prompt: String) -> Self {
        self.system_prompt = Some(prompt);
        self
    }

    /// Sets whether responses are streamed.
    pub fn with_streaming(mut self, streaming: bool) -> Self {
        self.streaming = streaming;
        self
    }

    /// Sets the API base URL.
    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_idle_timeout(mut self, timeout: Duration) -> Self {
        self.idle_timeout = timeout;
        self
    }

    /// Disables ANSI color output.
    pub fn without_color(mut self) -> Self {
        self.use_color = false;
        self
    }

    /// Sets whether traffic is logged.
    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    /// Builds a client over HTTP from this configuration.
    ///
    /// The API key is read from OPENAI_API_KEY when `api_key` is `None`.
    pub fn client(
        &self,
        api_key: Option<String>,
        logger: Option<Arc<dyn ClientLogger>>,
    ) -> Result<Client> {
        let transport = HttpTransport::with_options(
            api_key,
            Some(self.base_url.clone()),
            Some(self.request_timeout),
        )?;
        let client = Client::with_transport(Arc::new(transport))
            .with_model(self.model.clone())
            .with_idle_timeout(self.idle_timeout);
        Ok(match logger {
            Some(logger) => client.with_logger(logger),
            None => client,
        })
    }
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl From<ChatArgs> for ChatConfig {
    fn from(args: ChatArgs) -> Self {
        let defaults = ChatConfig::new();
        ChatConfig {
            model: args.model.map(Model::from).unwrap_or(defaults.model),
            system_prompt: args.system.filter(|s| !s.trim().is_empty()),
            streaming: !args.no_stream,
            base_url: args.base_url.unwrap_or(defaults.base_url),
            request_timeout: args
                .timeout
                .map(Duration::from_secs)
                .unwrap_or(defaults.request_timeout),
            idle_timeout: args
                .idle_timeout
                .map(Duration::from_secs)
                .unwrap_or(defaults.idle_timeout),
            use_color: !args.no_color,
            verbose: args.verbose,
        }
    }
}
