//! Output rendering for the chat application.
//!
//! This module provides a trait-based rendering abstraction that allows
//! for different output styles. The default implementation uses ANSI
//! escape codes to label replies and to show a placeholder while waiting
//! for the first fragment.

use std::io::{self, Stdout, Write};

/// ANSI escape code for dim text (used for the placeholder).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// ANSI escape code for cyan text (used for the reply label).
const ANSI_CYAN: &str = "\x1b[36m";

/// ANSI escape code for red text (used for errors).
const ANSI_RED: &str = "\x1b[31m";

/// ANSI escape code to erase from the cursor to the end of the line.
const ANSI_ERASE_LINE: &str = "\x1b[K";

/// Trait for rendering chat output.
///
/// This abstraction allows for different rendering strategies:
/// - Plain text with ANSI styling
/// - Plain text without styling (for piping/redirecting)
pub trait Renderer: Send {
    /// Called before the first fragment of a reply.
    ///
    /// `placeholder` is shown until text arrives, if the renderer can take it back.
    fn start_response(&mut self, placeholder: &str);

    /// Print a chunk of response text.
    ///
    /// This is called incrementally as fragments are streamed from the API.
    fn print_text(&mut self, text: &str);

    /// Print an error message.
    fn print_error(&mut self, error: &str);

    /// Print an informational message.
    fn print_info(&mut self, info: &str);

    /// Called when a response is complete.
    ///
    /// Used to ensure proper newlines and cleanup after streaming.
    fn finish_response(&mut self);
}

/// Plain text renderer with optional ANSI styling.
pub struct PlainTextRenderer {
    stdout: Stdout,
    use_color: bool,
    placeholder_len: usize,
}

impl PlainTextRenderer {
    /// Creates a new PlainTextRenderer with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new PlainTextRenderer with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self {
            stdout: io::stdout(),
            use_color,
            placeholder_len: 0,
        }
    }

    /// Flushes stdout to ensure immediate display of streamed content.
    fn flush(&mut self) {
        let _ = self.stdout.flush();
    }

    fn clear_placeholder(&mut self) {
        if self.placeholder_len > 0 {
            print!("{}", erase_placeholder(self.placeholder_len));
            self.placeholder_len = 0;
        }
    }
}

/// Moves the cursor back over `len` characters and erases them.
fn erase_placeholder(len: usize) -> String {
    format!("{}{ANSI_ERASE_LINE}", "\x08".repeat(len))
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for PlainTextRenderer {
    fn start_response(&mut self, placeholder: &str) {
        if self.use_color {
            print!("{ANSI_CYAN}Assistant:{ANSI_RESET} {ANSI_DIM}{placeholder}{ANSI_RESET}");
            self.placeholder_len = placeholder.chars().count();
        } else {
            print!("Assistant: ");
        }
        self.flush();
    }

    fn print_text(&mut self, text: &str) {
        self.clear_placeholder();
        print!("{text}");
        self.flush();
    }

    fn print_error(&mut self, error: &str) {
        self.clear_placeholder();
        if self.use_color {
            eprintln!("\n{ANSI_RED}Error: {error}{ANSI_RESET}");
        } else {
            eprintln!("\nError: {error}");
        }
    }

    fn print_info(&mut self, info: &str) {
        println!("{info}");
    }

    fn finish_response(&mut self) {
        self.clear_placeholder();
        println!();
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renderer_default_has_color() {
        let renderer = PlainTextRenderer::new();
        assert!(renderer.use_color);
    }

    #[test]
    fn renderer_without_color() {
        let renderer = PlainTextRenderer::with_color(false);
        assert!(!renderer.use_color);
    }

    #[test]
    fn placeholder_is_tracked_only_with_color() {
        let mut renderer = PlainTextRenderer::with_color(true);
        renderer.start_response(". . .");
        assert_eq!(renderer.placeholder_len, 5);
        renderer.print_text("Hi");
        assert_eq!(renderer.placeholder_len, 0);

        let mut renderer = PlainTextRenderer::with_color(false);
        renderer.start_response(". . .");
        assert_eq!(renderer.placeholder_len, 0);
    }

    #[test]
    fn erasing_backs_up_over_each_character() {
        assert_eq!(erase_placeholder(3), "\x08\x08\x08\x1b[K");
    }
}
