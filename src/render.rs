//! Terminal output for generated commands and streamed chat replies.

use std::io::{self, Stdout, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// ANSI escape code for cyan text (used for candidate commands).
const ANSI_CYAN: &str = "\x1b[36m";

/// ANSI escape code for green text (used for success notices).
const ANSI_GREEN: &str = "\x1b[32m";

/// ANSI escape code for red text (used for errors).
const ANSI_RED: &str = "\x1b[31m";

/// ANSI escape code for dim text (used for informational notices).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// Trait for rendering output to the operator.
///
/// The bash path uses it to show candidate commands and outcomes; the chat
/// path uses it to display reply text as it streams in.
pub trait Renderer: Send {
    /// Print a chunk of response text.
    ///
    /// This is called incrementally as text is streamed from the backend.
    fn print_text(&mut self, text: &str);

    /// Print a candidate command awaiting approval.
    fn print_command(&mut self, command: &str);

    /// Print a success notice.
    fn print_success(&mut self, message: &str) {
        self.print_info(message);
    }

    /// Print an error message.
    fn print_error(&mut self, error: &str);

    /// Print an informational message.
    fn print_info(&mut self, info: &str);

    /// Called when a response is complete.
    ///
    /// Used to ensure proper newlines after streaming.
    fn finish_response(&mut self);

    /// Called when the stream is interrupted by the user.
    fn print_interrupted(&mut self) {}

    /// Returns true if streaming should be interrupted.
    fn should_interrupt(&self) -> bool {
        false
    }
}

/// Plain text renderer with optional ANSI styling.
pub struct PlainTextRenderer {
    stdout: Stdout,
    use_color: bool,
    line_start: bool,
    interrupted: Option<Arc<AtomicBool>>,
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
            line_start: true,
            interrupted: None,
        }
    }

    /// Attaches an interrupt flag to the renderer.
    pub fn with_interrupt(mut self, interrupted: Arc<AtomicBool>) -> Self {
        self.interrupted = Some(interrupted);
        self
    }

    /// Returns true if output is styled.
    pub fn use_color(&self) -> bool {
        self.use_color
    }

    fn flush(&mut self) {
        let _ = self.stdout.flush();
    }

    fn styled(&self, style: &str, text: &str) -> String {
        if self.use_color {
            format!("{style}{text}{ANSI_RESET}")
        } else {
            text.to_string()
        }
    }

    fn end_partial_line(&mut self) {
        if !self.line_start {
            println!();
            self.line_start = true;
        }
    }
}

impl Default for PlainTextRenderer {
    fn default() -> Self {
        Self::new()
    }
}

impl Renderer for PlainTextRenderer {
    fn print_text(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        print!("{text}");
        self.line_start = text.ends_with('\n');
        self.flush();
    }

    fn print_command(&mut self, command: &str) {
        self.end_partial_line();
        println!("{}", self.styled(ANSI_CYAN, command));
        self.flush();
    }

    fn print_success(&mut self, message: &str) {
        self.end_partial_line();
        println!("{}", self.styled(ANSI_GREEN, message));
        self.flush();
    }

    fn print_error(&mut self, error: &str) {
        self.end_partial_line();
        self.flush();
        eprintln!("{}", self.styled(ANSI_RED, &format!("Error: {error}")));
    }

    fn print_info(&mut self, info: &str) {
        self.end_partial_line();
        println!("{}", self.styled(ANSI_DIM, info));
        self.flush();
    }

    fn finish_response(&mut self) {
        println!();
        self.line_start = true;
        self.flush();
    }

    fn print_interrupted(&mut self) {
        self.end_partial_line();
        println!("[interrupted]");
        self.flush();
    }

    fn should_interrupt(&self) -> bool {
        self.interrupted
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

/// A renderer that collects everything into a string.
///
/// Useful when output is consumed programmatically rather than shown.
#[derive(Debug, Default, Clone)]
pub struct BufferRenderer {
    /// Everything rendered so far, one notice per line.
    pub output: String,
}

impl BufferRenderer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }
}

impl Renderer for BufferRenderer {
    fn print_text(&mut self, text: &str) {
        self.output.push_str(text);
    }

    fn print_command(&mut self, command: &str) {
        self.output.push_str(command);
        self.output.push('\n');
    }

    fn print_error(&mut self, error: &str) {
        self.output.push_str("Error: ");
        self.output.push_str(error);
        self.output.push('\n');
    }

    fn print_info(&mut self, info: &str) {
        self.output.push_str(info);
        self.output.push('\n');
    }

    fn finish_response(&mut self) {
        self.output.push('\n');
    }
}
