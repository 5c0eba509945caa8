//! The model backend contract.
//!
//! A [`Backend`] offers two capabilities: a single-shot text generation call
//! bounded by a timeout, and a streaming call that yields [`StreamChunk`]s as
//! the model produces them.  [`crate::OllamaClient`] talks to a real server,
//! [`crate::DummyBackend`] answers offline, and tests substitute scripted
//! fakes.

use std::pin::Pin;
use std::time::Duration;

use futures::Stream;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// One decoded record of a generation response.
///
/// Streaming responses are a sequence of these, ending with `done == true`.
/// A record carrying `error` is terminal and has no further content.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamChunk {
    /// Text produced since the previous chunk.
    #[serde(default)]
    pub response: String,

    /// Set on the final chunk.
    #[serde(default)]
    pub done: bool,

    /// Error reported by the backend in place of content.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl StreamChunk {
    /// A content chunk.
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            response: text.into(),
            done: false,
            error: None,
        }
    }

    /// The successful terminal chunk.
    pub fn done() -> Self {
        Self {
            response: String::new(),
            done: true,
            error: None,
        }
    }

    /// A terminal error chunk.
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            response: String::new(),
            done: true,
            error: Some(message.into()),
        }
    }

    /// Returns true if no chunk may follow this one.
    pub fn is_terminal(&self) -> bool {
        self.done || self.error.is_some()
    }
}

/// A boxed stream of decoded chunks.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<StreamChunk>> + Send>>;

/// A text-generation capability.
#[async_trait::async_trait]
pub trait Backend: Send + Sync {
    /// Generates a complete reply to `prompt`, failing with
    /// [`crate::Error::Timeout`] if it takes longer than `timeout`.
    async fn generate(&self, model: &str, prompt: &str, timeout: Duration) -> Result<String>;

    /// Opens a streaming exchange for `prompt`.
    ///
    /// Errors that happen before the first chunk (unreachable server, bad
    /// status) are returned directly; errors afterwards arrive in the stream.
    async fn stream(&self, model: &str, prompt: &str) -> Result<ChunkStream>;
}

#[async_trait::async_trait]
impl<B: Backend + ?Sized> Backend for std::sync::Arc<B> {
    async fn generate(&self, model: &str, prompt: &str, timeout: Duration) -> Result<String> {
        (**self).generate(model, prompt, timeout).await
    }

    async fn stream(&self, model: &str, prompt: &str) -> Result<ChunkStream> {
        (**self).stream(model, prompt).await
    }
}

#[async_trait::async_trait]
impl<B: Backend + ?Sized> Backend for &B {
    async fn generate(&self, model: &str, prompt: &str, timeout: Duration) -> Result<String> {
        (**self).generate(model, prompt, timeout).await
    }

    async fn stream(&self, model: &str, prompt: &str) -> Result<ChunkStream> {
        (**self).stream(model, prompt).await
    }
}
