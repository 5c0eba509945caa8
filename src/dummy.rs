//! An offline backend that answers without a model server.

use std::time::Duration;

use futures::stream;

use crate::backend::{Backend, ChunkStream, StreamChunk};
use crate::error::Result;

/// Echoes the prompt back as a canned reply.
///
/// Streaming replies are split on word boundaries so the terminal and SSE
/// paths behave as they would with a real model.
#[derive(Debug, Clone, Copy, Default)]
pub struct DummyBackend;

impl DummyBackend {
    /// The reply produced for `prompt`.
    pub fn reply(prompt: &str) -> String {
        format!("Dummy response to: {prompt}")
    }
}

#[async_trait::async_trait]
impl Backend for DummyBackend {
    async fn generate(&self, _: &str, prompt: &str, _: Duration) -> Result<String> {
        Ok(Self::reply(prompt))
    }

    async fn stream(&self, _: &str, prompt: &str) -> Result<ChunkStream> {
        let reply = Self::reply(prompt);
        let mut chunks: Vec<Result<StreamChunk>> = reply
            .split_inclusive(' ')
            .map(|word| Ok(StreamChunk::text(word)))
            .collect();
        chunks.push(Ok(StreamChunk::done()));
        Ok(Box::pin(stream::iter(chunks)))
    }
}
