//! Chat with a local model from the terminal.
//!
//! # Usage
//!
//! ```bash
//! # Interactive, optionally starting with a first message
//! clai-chat
//! clai-chat how do I find large files?
//!
//! # One question, one answer
//! clai-chat --no-repl what does chmod 755 mean
//! ```
//!
//! Replies stream as they are generated; Ctrl+C stops the current reply.
//! Type `exit` or `quit` to leave.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use arrrg::CommandLine;

use clai::{
    Backend, ChatArgs, ChatSession, ClaiConfig, Error, MemoryStore, PlainTextRenderer, Renderer,
    RustylineOperator, SendRequest, connect_backend, init_logging, version_line,
};

const USAGE: &str = "clai-chat [OPTIONS] [prompt...]";

/// Conversation id used for the terminal session.
const TERMINAL_CHAT: &str = "terminal";

/// Main entry point for the clai-chat application.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let (args, free) = ChatArgs::from_command_line_relaxed(USAGE);
    if args.version {
        println!("{}", version_line());
        return Ok(());
    }
    let config = ClaiConfig::from(&args);
    let use_color = config.use_color;

    let session = ChatSession::new(connect_backend(&config)?, MemoryStore::new(), config);
    session.create_conversation(TERMINAL_CHAT, "").await?;
    let prompt = free.join(" ");

    if args.no_repl {
        let mut renderer = PlainTextRenderer::with_color(use_color);
        if prompt.trim().is_empty() {
            renderer.print_error("please provide a prompt");
            eprintln!("usage: {USAGE}");
            std::process::exit(2);
        }
        match session.send(SendRequest::new(TERMINAL_CHAT, prompt)).await {
            Ok(reply) => println!("{}", reply.content),
            Err(err) => {
                renderer.print_error(&err.to_string());
                std::process::exit(1);
            }
        }
        return Ok(());
    }

    // Flag for interrupt handling during streaming
    let interrupted = Arc::new(AtomicBool::new(false));
    let interrupted_clone = interrupted.clone();
    ctrlc::set_handler(move || {
        interrupted_clone.store(true, Ordering::Relaxed);
    })?;

    let mut renderer = PlainTextRenderer::with_color(use_color).with_interrupt(interrupted.clone());
    let mut operator = RustylineOperator::new()?;

    renderer.print_info(&format!(
        "clai chat (model: {}) - type your messages ('exit' to quit)",
        session.model()
    ));

    if !prompt.trim().is_empty() {
        println!("You: {prompt}");
        stream_reply(&session, &mut renderer, &prompt).await;
    }

    loop {
        interrupted.store(false, Ordering::Relaxed);

        let line = match operator.read_line("You: ") {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                renderer.print_error(&format!("Input error: {err}"));
                break;
            }
        };

        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        if line == "exit" || line == "quit" {
            break;
        }

        stream_reply(&session, &mut renderer, line).await;
    }

    renderer.print_info("Goodbye!");
    Ok(())
}

async fn stream_reply<B: Backend>(
    session: &ChatSession<B, MemoryStore>,
    renderer: &mut PlainTextRenderer,
    prompt: &str,
) {
    renderer.print_text("AI: ");
    let result = session
        .send_streaming(SendRequest::new(TERMINAL_CHAT, prompt), |chunk| {
            if renderer.should_interrupt() {
                return Err(Error::consumer_aborted("interrupted"));
            }
            renderer.print_text(chunk);
            Ok(())
        })
        .await;

    match result {
        Ok(_) => renderer.finish_response(),
        Err(err) if err.is_consumer_aborted() => renderer.print_interrupted(),
        Err(err) => renderer.print_error(&err.to_string()),
    }
}
