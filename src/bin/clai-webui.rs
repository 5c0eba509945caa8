//! Serves the chat API over HTTP.
//!
//! # Usage
//!
//! ```bash
//! clai-webui --port 8080
//! clai-webui --data-file /tmp/clai.db --dummy
//! ```
//!
//! Conversations are kept in a SQLite database, by default
//! `$XDG_DATA_HOME/clai/clai.db`.

use std::path::PathBuf;
use std::sync::Arc;

use arrrg::CommandLine;
use tokio::net::TcpListener;

use clai::config::DEFAULT_PORT;
use clai::{
    ChatSession, ClaiConfig, ServeArgs, SqliteStore, connect_backend, init_logging, version_line,
    web,
};

/// Main entry point for the clai-webui application.
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_logging();
    let (args, free) = ServeArgs::from_command_line_relaxed("clai-webui [OPTIONS]");
    if args.version {
        println!("{}", version_line());
        return Ok(());
    }
    if !free.is_empty() {
        eprintln!("clai-webui takes no positional arguments");
        std::process::exit(2);
    }
    let config = ClaiConfig::from(&args);

    let data_file = match &args.data_file {
        Some(path) => PathBuf::from(path),
        None => clai::default_data_file()?,
    };
    let store = SqliteStore::open(&data_file).await?;
    let session = Arc::new(ChatSession::new(connect_backend(&config)?, store, config));

    let port = args.port.unwrap_or(DEFAULT_PORT);
    let listener = TcpListener::bind(("127.0.0.1", port)).await?;
    println!("Starting clai web UI at http://localhost:{port}");
    println!("Conversations are stored in {}", data_file.display());
    println!("Press Ctrl+C to stop");

    web::serve(listener, web::router(session)).await?;
    Ok(())
}
