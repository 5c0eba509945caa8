//! Relays a streaming backend exchange to a chunk consumer.

use std::fmt;
use std::time::Instant;

use futures::StreamExt;

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::observability::{STREAM_ABORTS, STREAM_CHUNKS, STREAM_DURATION, STREAM_ERRORS};

/// A failed stream and the text received before it failed.
#[derive(Debug, Clone)]
pub struct StreamFailure {
    /// Concatenated text of every chunk delivered before the failure,
    /// including a chunk the consumer rejected.
    pub partial: String,
    /// What went wrong.
    pub error: Error,
}

impl StreamFailure {
    fn new(partial: String, error: Error) -> Self {
        Self { partial, error }
    }
}

impl fmt::Display for StreamFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (after {} bytes)", self.error, self.partial.len())
    }
}

impl std::error::Error for StreamFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl From<StreamFailure> for Error {
    fn from(failure: StreamFailure) -> Self {
        failure.error
    }
}

/// Drives a backend stream, accumulating text and handing each piece to a
/// callback as soon as it is decoded.
#[derive(Debug, Clone)]
pub struct StreamBridge<B: Backend> {
    backend: B,
}

impl<B: Backend> StreamBridge<B> {
    /// Creates a bridge over `backend`.
    pub fn new(backend: B) -> Self {
        Self { backend }
    }

    /// Returns the wrapped backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Streams a reply to `prompt` from `model`, calling `on_chunk` with each
    /// non-empty piece of text in arrival order.
    ///
    /// Returns the full text once the backend sends its final chunk.  If
    /// `on_chunk` fails, no further chunks are read and the exchange fails
    /// with [`Error::ConsumerAborted`].  A stream that ends without a final
    /// chunk fails with [`Error::Streaming`].
    pub async fn stream<F>(
        &self,
        model: &str,
        prompt: &str,
        mut on_chunk: F,
    ) -> std::result::Result<String, StreamFailure>
    where
        F: FnMut(&str) -> Result<()>,
    {
        let start = Instant::now();
        let mut chunks = self
            .backend
            .stream(model, prompt)
            .await
            .map_err(|error| {
                STREAM_ERRORS.click();
                tracing::warn!(model, %error, "could not open stream");
                StreamFailure::new(String::new(), error)
            })?;

        let mut text = String::new();
        while let Some(chunk) = chunks.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(error) => {
                    STREAM_ERRORS.click();
                    tracing::warn!(model, %error, "stream failed");
                    return Err(StreamFailure::new(text, error));
                }
            };
            if let Some(message) = chunk.error {
                STREAM_ERRORS.click();
                tracing::warn!(model, %message, "backend reported an error mid-stream");
                let error = Error::from_backend_message(model, 200, message);
                return Err(StreamFailure::new(text, error));
            }
            if !chunk.response.is_empty() {
                STREAM_CHUNKS.click();
                text.push_str(&chunk.response);
                if let Err(err) = on_chunk(&chunk.response) {
                    STREAM_ABORTS.click();
                    tracing::debug!(model, error = %err, "consumer stopped the stream");
                    let error = match err {
                        err @ Error::ConsumerAborted { .. } => err,
                        err => Error::consumer_aborted(err.to_string()),
                    };
                    return Err(StreamFailure::new(text, error));
                }
            }
            if chunk.done {
                STREAM_DURATION.add(start.elapsed().as_secs_f64());
                return Ok(text);
            }
        }

        STREAM_ERRORS.click();
        tracing::warn!(model, "stream closed before the final chunk");
        Err(StreamFailure::new(
            text,
            Error::streaming("stream ended before the final chunk", None),
        ))
    }
}
