// Public modules
pub mod approval;
pub mod backend;
pub mod bridge;
pub mod config;
pub mod dummy;
pub mod error;
pub mod executor;
pub mod generator;
pub mod observability;
pub mod ollama;
pub mod render;
pub mod session;
pub mod store;
pub mod terminal;
pub mod web;

use std::sync::Arc;

// Re-exports
pub use approval::{
    ApprovalLoop, ApprovalOutcome, ApprovalState, CancelReason, Choice, Clipboard, Operator,
};
pub use backend::{Backend, ChunkStream, StreamChunk};
pub use bridge::{StreamBridge, StreamFailure};
pub use config::{ChatArgs, ClaiConfig, CommandArgs, ServeArgs, default_data_file, version_line};
pub use dummy::DummyBackend;
pub use error::{Error, Result};
pub use executor::{Executor, ShellExecutor};
pub use generator::{CommandGenerator, dummy_command, sanitize_command};
pub use observability::{init_logging, register_biometrics};
pub use ollama::OllamaClient;
pub use render::{BufferRenderer, PlainTextRenderer, Renderer};
pub use session::{ChatSession, SendRequest};
pub use store::{
    ChatMessage, ChatStore, Conversation, ConversationWithMessages, MemoryStore, Role, SqliteStore,
};
pub use terminal::{RustylineOperator, SystemClipboard};

/// Picks the backend selected by `config`: the offline [`DummyBackend`] in
/// dummy mode, otherwise an [`OllamaClient`] for the configured server.
pub fn connect_backend(config: &ClaiConfig) -> Result<Arc<dyn Backend>> {
    if config.dummy {
        tracing::info!("using the offline dummy backend");
        return Ok(Arc::new(DummyBackend));
    }
    Ok(Arc::new(OllamaClient::from_config(config)?))
}
