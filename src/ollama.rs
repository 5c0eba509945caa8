//! HTTP client for a local Ollama server.
//!
//! Both capabilities of [`Backend`] go through `POST /api/generate`.  The
//! single-shot call reads one JSON object; the streaming call decodes the
//! newline-delimited JSON objects Ollama writes as tokens are produced.

use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use futures::Stream;
use futures::stream::{self, StreamExt};
use reqwest::{Client as ReqwestClient, Response, StatusCode};
use serde::Serialize;

use crate::backend::{Backend, ChunkStream, StreamChunk};
use crate::config::ClaiConfig;
use crate::error::{Error, Result};
use crate::observability::{
    BACKEND_REQUESTS, BACKEND_REQUEST_DURATION, BACKEND_REQUEST_ERRORS, STREAM_BYTES,
};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

/// Client for the Ollama generate API.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    client: ReqwestClient,
    base_url: String,
}

impl OllamaClient {
    /// Create a new client for the server at `base_url`.
    ///
    /// The URL must be absolute, e.g. `http://localhost:11434`.
    pub fn new(base_url: &str) -> Result<Self> {
        let parsed = url::Url::parse(base_url)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::validation(
                format!("unsupported scheme in {base_url}"),
                Some("base_url".to_string()),
            ));
        }

        // No overall timeout: streams run as long as the model keeps talking.
        // Single-shot calls set their own per-request timeout.
        let client = ReqwestClient::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| {
                Error::http_client(
                    format!("Failed to build HTTP client: {e}"),
                    Some(Box::new(e)),
                )
            })?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// Create a client from the resolved configuration.
    pub fn from_config(config: &ClaiConfig) -> Result<Self> {
        Self::new(&config.base_url)
    }

    /// Returns the server root this client talks to.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn generate_url(&self) -> String {
        format!("{}/api/generate", self.base_url)
    }

    async fn post(&self, request: &GenerateRequest<'_>, timeout: Option<Duration>) -> Result<Response> {
        BACKEND_REQUESTS.click();
        tracing::debug!(model = request.model, stream = request.stream, "posting generate request");

        let mut builder = self.client.post(self.generate_url()).json(request);
        if let Some(timeout) = timeout {
            builder = builder.timeout(timeout);
        }

        builder.send().await.map_err(|e| {
            BACKEND_REQUEST_ERRORS.click();
            request_error(e, timeout)
        })
    }
}

#[async_trait::async_trait]
impl Backend for OllamaClient {
    async fn generate(&self, model: &str, prompt: &str, timeout: Duration) -> Result<String> {
        let start = Instant::now();
        let request = GenerateRequest {
            model,
            prompt,
            stream: false,
        };
        let response = self.post(&request, Some(timeout)).await?;
        let status = response.status();
        let body = response.text().await.map_err(|e| {
            BACKEND_REQUEST_ERRORS.click();
            request_error(e, Some(timeout))
        })?;
        BACKEND_REQUEST_DURATION.add(start.elapsed().as_secs_f64());

        let result = interpret_generate_body(model, status, &body);
        if let Err(err) = &result {
            BACKEND_REQUEST_ERRORS.click();
            tracing::warn!(model, status = status.as_u16(), error = %err, "generate failed");
        }
        result
    }

    async fn stream(&self, model: &str, prompt: &str) -> Result<ChunkStream> {
        let request = GenerateRequest {
            model,
            prompt,
            stream: true,
        };
        let response = self.post(&request, None).await?;
        let status = response.status();
        if !status.is_success() {
            BACKEND_REQUEST_ERRORS.click();
            let body = response.text().await.unwrap_or_default();
            let err = classify_failure(model, status, &body);
            tracing::warn!(model, status = status.as_u16(), error = %err, "stream request rejected");
            return Err(err);
        }
        Ok(Box::pin(process_ndjson(response.bytes_stream())))
    }
}

fn request_error(e: reqwest::Error, timeout: Option<Duration>) -> Error {
    if e.is_timeout() {
        Error::timeout(
            format!("Request timed out: {e}"),
            timeout.map(|t| t.as_secs_f64()),
        )
    } else {
        Error::backend_unavailable(format!("{e}"), Some(Box::new(e)))
    }
}

/// Interprets the body of a non-streaming generate response.
///
/// An error reported in the body takes precedence over the status code, so
/// that a missing model is recognised even when it comes with a 404.
fn interpret_generate_body(model: &str, status: StatusCode, body: &str) -> Result<String> {
    match serde_json::from_str::<StreamChunk>(body) {
        Ok(chunk) => {
            if let Some(message) = chunk.error.filter(|m| !m.is_empty()) {
                return Err(Error::from_backend_message(model, status.as_u16(), message));
            }
            if !status.is_success() {
                return Err(Error::backend(status.as_u16(), body));
            }
            if chunk.response.is_empty() {
                return Err(Error::EmptyResponse);
            }
            Ok(chunk.response)
        }
        Err(_) if !status.is_success() => Err(Error::backend(status.as_u16(), body)),
        Err(e) => Err(Error::serialization(
            format!("Failed to parse response: {e}"),
            Some(Box::new(e)),
        )),
    }
}

fn classify_failure(model: &str, status: StatusCode, body: &str) -> Error {
    match serde_json::from_str::<StreamChunk>(body) {
        Ok(StreamChunk {
            error: Some(message),
            ..
        }) => Error::from_backend_message(model, status.as_u16(), message),
        _ => Error::backend(status.as_u16(), body),
    }
}

/// Process a stream of bytes into a stream of newline-delimited chunks.
///
/// Records may be split across network reads; bytes are buffered until a
/// full line is available so multi-byte characters are never cut in half.
pub fn process_ndjson<S>(byte_stream: S) -> impl Stream<Item = Result<StreamChunk>> + Send
where
    S: Stream<Item = std::result::Result<Bytes, reqwest::Error>> + Unpin + Send + 'static,
{
    let stream = byte_stream.map(|result| {
        result.map_err(|e| Error::streaming(format!("Error in HTTP stream: {e}"), Some(Box::new(e))))
    });

    stream::unfold(
        (stream, BytesMut::new(), false),
        move |(mut stream, mut buffer, finished)| async move {
            if finished {
                return None;
            }
            loop {
                while let Some(line) = next_line(&mut buffer) {
                    if let Some(item) = decode_line(&line) {
                        return Some((item, (stream, buffer, false)));
                    }
                }

                match stream.next().await {
                    Some(Ok(bytes)) => {
                        STREAM_BYTES.count(bytes.len() as u64);
                        buffer.extend_from_slice(&bytes);
                    }
                    Some(Err(e)) => {
                        return Some((Err(e), (stream, buffer, true)));
                    }
                    None => {
                        // A final record may arrive without its newline.
                        let rest = buffer.split();
                        return decode_line(&rest).map(|item| (item, (stream, buffer, true)));
                    }
                }
            }
        },
    )
}

fn next_line(buffer: &mut BytesMut) -> Option<BytesMut> {
    let pos = buffer.iter().position(|b| *b == b'\n')?;
    Some(buffer.split_to(pos + 1))
}

fn decode_line(line: &[u8]) -> Option<Result<StreamChunk>> {
    let text = match std::str::from_utf8(line) {
        Ok(text) => text.trim(),
        Err(e) => return Some(Err(e.into())),
    };
    if text.is_empty() {
        return None;
    }
    Some(serde_json::from_str::<StreamChunk>(text).map_err(|e| {
        Error::serialization(
            format!("Failed to parse chunk JSON: {e}"),
            Some(Box::new(e)),
        )
    }))
}
