//! Chat application module for interactive conversations.
//!
//! This module provides a REPL chat interface built on top of the parley
//! client library. It supports:
//!
//! - Streamed or complete responses, switchable mid-conversation
//! - A placeholder that is replaced by the first fragment of each reply
//! - Slash commands for session control
//! - Configurable model, system prompt, endpoint and timeouts
//!
//! # Architecture
//!
//! The module is organized into several components:
//!
//! - [`config`]: CLI argument parsing and configuration
//! - [`controller`]: the conversation actor that owns the transcript
//! - [`commands`]: Slash command parsing and handling
//! - [`render`]: terminal output

mod commands;
mod config;
mod controller;
mod render;

pub use commands::{ChatCommand, help_text, parse_command};
pub use config::{ChatArgs, ChatConfig};
pub use controller::{
    ConversationEvent, ConversationHandle, ConversationStats, NO_RESPONSE, spawn,
};
pub use render::{PlainTextRenderer, Renderer};
