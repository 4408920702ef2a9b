//! Interactive chat application for OpenAI-compatible chat completion APIs.
//!
//! # Usage
//!
//! ```bash
//! # Basic usage with default settings; reads OPENAI_API_KEY
//! parley-chat
//!
//! # Specify a model
//! parley-chat --model gpt-4o
//!
//! # Set a system prompt
//! parley-chat --system "You are a helpful coding assistant"
//!
//! # Talk to a local server and wait for whole replies
//! parley-chat --base-url http://localhost:11434/v1/ --no-stream
//!
//! # Disable colors (useful for piping output)
//! parley-chat --no-color
//! ```
//!
//! # Commands
//!
//! While chatting, you can use slash commands:
//! - `/help` - Show available commands
//! - `/stream on|off` - Switch between streamed and complete replies
//! - `/model <name>` - Change the model
//! - `/history` - Print the conversation as JSON
//! - `/stats` - Show session statistics
//! - `/quit` - Exit the application

use std::sync::Arc;

use arrrg::CommandLine;
use rustyline::DefaultEditor;
use rustyline::error::ReadlineError;
use tokio::sync::mpsc::UnboundedReceiver;

use parley::chat::{
    ChatArgs, ChatCommand, ChatConfig, ConversationEvent, ConversationHandle, PlainTextRenderer,
    Renderer, help_text, parse_command, spawn,
};
use parley::{ChatCompletion, ChatRequest, ClientLogger, Model, SENTINEL};

/// Echoes traffic to stderr.
struct StderrLogger;

impl ClientLogger for StderrLogger {
    fn log_request(&self, request: &ChatRequest) {
        eprintln!(
            "[request] {}",
            serde_json::to_string(request).unwrap_or_default()
        );
    }

    fn log_response(&self, completion: &ChatCompletion) {
        eprintln!(
            "[response] {}",
            serde_json::to_string(completion).unwrap_or_default()
        );
    }

    fn log_stream_line(&self, line: &str) {
        if !line.is_empty() {
            eprintln!("[stream] {line}");
        }
    }

    fn log_stream_complete(&self, text: &str) {
        eprintln!("[stream complete] {} bytes", text.len());
    }
}

/// Main entry point for the parley-chat application.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let (args, _) = ChatArgs::from_command_line_relaxed("parley-chat [OPTIONS]");
    let config = ChatConfig::from(args);

    let logger: Option<Arc<dyn ClientLogger>> = if config.verbose {
        Some(Arc::new(StderrLogger))
    } else {
        None
    };
    let client = config.client(None, logger)?;
    let (conversation, mut events) = spawn(client, &config);
    let mut renderer = PlainTextRenderer::with_color(config.use_color);
    let mut rl = DefaultEditor::new()?;

    println!(
        "parley chat (model: {}, streaming: {})",
        config.model,
        on_off(config.streaming)
    );
    println!("Type /help for commands, /quit to exit\n");

    loop {
        let readline = rl.readline("You: ");

        match readline {
            Ok(line) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }

                let _ = rl.add_history_entry(line);

                // Check for slash commands
                if let Some(cmd) = parse_command(line) {
                    match cmd {
                        ChatCommand::Quit => {
                            println!("Goodbye!");
                            break;
                        }
                        ChatCommand::Help => {
                            for line in help_text().lines() {
                                println!("    {line}");
                            }
                        }
                        ChatCommand::Streaming(streaming) => {
                            conversation.set_streaming(streaming)?;
                            renderer.print_info(&format!("Streaming {}.", on_off(streaming)));
                        }
                        ChatCommand::Model(model_name) => {
                            conversation.set_model(Model::from(model_name.as_str()))?;
                            renderer.print_info(&format!("Model changed to: {model_name}"));
                        }
                        ChatCommand::History => {
                            print_history(&conversation, &mut renderer).await?;
                        }
                        ChatCommand::Stats => {
                            print_stats(&conversation).await?;
                        }
                        ChatCommand::ShowConfig => {
                            print_config(&config, &conversation).await?;
                        }
                        ChatCommand::Invalid(message) => {
                            renderer.print_error(&message);
                        }
                    }
                    continue;
                }

                // Regular message - send to API
                match conversation.submit(line).await {
                    Ok(Some(position)) => {
                        renderer.start_response(SENTINEL);
                        render_reply(position, &mut events, &mut renderer).await;
                    }
                    Ok(None) => {}
                    Err(e) => renderer.print_error(&e.to_string()),
                }
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl+C at prompt - soft interrupt
                println!();
                continue;
            }
            Err(ReadlineError::Eof) => {
                // Ctrl+D - exit
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                renderer.print_error(&format!("Input error: {err}"));
                break;
            }
        }
    }

    Ok(())
}

/// Print the reply at `position` as it arrives, returning once it settles.
async fn render_reply(
    position: usize,
    events: &mut UnboundedReceiver<ConversationEvent>,
    renderer: &mut PlainTextRenderer,
) {
    while let Some(event) = events.recv().await {
        match event {
            ConversationEvent::Updated {
                position: p, delta, ..
            } if p == position => renderer.print_text(&delta),
            ConversationEvent::Settled { position: p, .. } if p == position => {
                renderer.finish_response();
                return;
            }
            _ => {}
        }
    }
    renderer.print_error("the conversation stopped unexpectedly");
}

async fn print_history(
    conversation: &ConversationHandle,
    renderer: &mut PlainTextRenderer,
) -> parley::Result<()> {
    let messages: Vec<_> = conversation
        .snapshot()
        .await?
        .into_iter()
        .filter(|m| m.is_displayed())
        .collect();
    match serde_json::to_string_pretty(&messages) {
        Ok(json) => renderer.print_info(&json),
        Err(err) => renderer.print_error(&format!("Failed to format history: {err}")),
    }
    Ok(())
}

async fn print_stats(conversation: &ConversationHandle) -> parley::Result<()> {
    let stats = conversation.stats().await?;
    println!("    Session Statistics:");
    println!("      Model: {}", stats.model);
    println!("      Streaming: {}", on_off(stats.streaming));
    println!("      Messages: {}", stats.message_count);
    println!("      Updates: {}", stats.revision);
    println!(
        "      Requests: {} ({} failed)",
        stats.total_requests, stats.failed_requests
    );
    Ok(())
}

async fn print_config(config: &ChatConfig, conversation: &ConversationHandle) -> parley::Result<()> {
    let stats = conversation.stats().await?;
    println!("    Current Configuration:");
    println!("      Model: {}", stats.model);
    println!("      Streaming: {}", on_off(stats.streaming));
    println!("      Base URL: {}", config.base_url);
    println!(
        "      Request timeout: {}s",
        config.request_timeout.as_secs()
    );
    println!("      Idle timeout: {}s", config.idle_timeout.as_secs());
    if let Some(prompt) = config.system_prompt.as_deref() {
        println!("      System prompt: {prompt}");
    } else {
        println!("      System prompt: (none)");
    }
    Ok(())
}

fn on_off(value: bool) -> &'static str {
    if value { "on" } else { "off" }
}
