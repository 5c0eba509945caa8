//! Turns a natural-language request into a shell command and runs it once
//! you approve.
//!
//! # Usage
//!
//! ```bash
//! # One request
//! clai list files in the current directory
//!
//! # Keep asking
//! clai --repl
//!
//! # Without a model server
//! clai --dummy show me disk usage
//! ```
//!
//! At the `Execute? [Y/n/e/c]` prompt: Enter or `y` runs the command, `n`
//! cancels, `e` edits it, and `c` copies it to the clipboard.

use std::time::Duration;

use arrrg::CommandLine;

use clai::{
    ApprovalLoop, Backend, ClaiConfig, CommandArgs, CommandGenerator, PlainTextRenderer, Renderer,
    RustylineOperator, ShellExecutor, SystemClipboard, connect_backend, init_logging, version_line,
};

const USAGE: &str = "clai [OPTIONS] <prompt...>";

/// How long a one-shot run keeps copied text available before exiting.
const CLIPBOARD_HOLD: Duration = Duration::from_secs(5);

/// Main entry point for the clai application.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let (args, free) = CommandArgs::from_command_line_relaxed(USAGE);
    if args.version {
        println!("{}", version_line());
        return Ok(());
    }
    let config = ClaiConfig::from(&args);

    let mut renderer = PlainTextRenderer::with_color(config.use_color);
    let generator = CommandGenerator::new(connect_backend(&config)?, &config);
    let mut operator = RustylineOperator::new()?;

    if args.repl {
        let mut clipboard = SystemClipboard::new();
        run_repl(&config, &generator, &mut operator, &mut clipboard, &mut renderer).await;
        return Ok(());
    }

    let prompt = free.join(" ");
    if prompt.trim().is_empty() {
        renderer.print_error("please provide a prompt (or use --repl for interactive mode)");
        eprintln!("usage: {USAGE}");
        std::process::exit(2);
    }
    let mut clipboard = SystemClipboard::new().holding_for(CLIPBOARD_HOLD);
    let result = handle_prompt(
        &config,
        &generator,
        &mut operator,
        &mut clipboard,
        &mut renderer,
        &prompt,
    )
    .await;
    if let Err(err) = result {
        renderer.print_error(&err.to_string());
        std::process::exit(1);
    }
    Ok(())
}

async fn handle_prompt<B: Backend>(
    config: &ClaiConfig,
    generator: &CommandGenerator<B>,
    operator: &mut RustylineOperator,
    clipboard: &mut SystemClipboard,
    renderer: &mut dyn Renderer,
    prompt: &str,
) -> clai::Result<()> {
    config.validate_prompt(prompt)?;
    let command = generator.generate(prompt).await?;

    let mut executor = ShellExecutor::new();
    ApprovalLoop::new(operator, clipboard, &mut executor).run(command, renderer)?;
    Ok(())
}

async fn run_repl<B: Backend>(
    config: &ClaiConfig,
    generator: &CommandGenerator<B>,
    operator: &mut RustylineOperator,
    clipboard: &mut SystemClipboard,
    renderer: &mut dyn Renderer,
) {
    renderer.print_info(&format!(
        "clai bash REPL (model: {}) - type your requests ('exit' to quit)",
        generator.model()
    ));

    loop {
        let line = match operator.read_line("bash> ") {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(err) => {
                renderer.print_error(&format!("Input error: {err}"));
                break;
            }
        };

        let prompt = line.trim();
        if prompt.is_empty() {
            continue;
        }
        if prompt == "exit" || prompt == "quit" {
            break;
        }

        if let Err(err) = handle_prompt(config, generator, operator, clipboard, renderer, prompt).await {
            renderer.print_error(&err.to_string());
        }
    }
    renderer.print_info("Goodbye!");
}
