//! HTTP transport for chat sessions.
//!
//! Routes:
//!
//! - `GET /health`
//! - `GET /api/chats`, `POST /api/chats`
//! - `GET|PUT|DELETE /api/chats/{id}`
//! - `POST /api/chats/{id}/send`, answered as JSON or, with `"stream": true`,
//!   as server-sent events
//!
//! Failures are reported as `{"error": <status text>, "message": <detail>}`.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures::stream;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tokio::sync::mpsc;

use crate::backend::Backend;
use crate::error::{Error, Result};
use crate::session::{ChatSession, SendRequest};
use crate::store::{ChatMessage, ChatStore, Conversation, ConversationWithMessages};

/// Shared state handed to every request.
pub type SharedSession<B, S> = Arc<ChatSession<B, S>>;

/// Maps an error to the HTTP status reported for it.
pub fn status_for(err: &Error) -> StatusCode {
    match err {
        Error::Validation { .. } => StatusCode::BAD_REQUEST,
        Error::NotFound { .. } => StatusCode::NOT_FOUND,
        Error::Conflict { .. } => StatusCode::CONFLICT,
        Error::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
        err if err.is_backend() => StatusCode::BAD_GATEWAY,
        Error::Streaming { .. } => StatusCode::BAD_GATEWAY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

/// Body of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiErrorBody {
    /// Canonical text of the status code.
    pub error: String,
    /// What went wrong.
    pub message: String,
}

/// An [`Error`] rendered as an HTTP response.
#[derive(Debug)]
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        Self(Error::validation(
            format!("invalid request body: {}", rejection.body_text()),
            None,
        ))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = status_for(&self.0);
        if status.is_server_error() {
            tracing::warn!(status = status.as_u16(), error = %self.0, "request failed");
        } else {
            tracing::debug!(status = status.as_u16(), error = %self.0, "request rejected");
        }
        let body = ApiErrorBody {
            error: status.canonical_reason().unwrap_or("Error").to_string(),
            message: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// One server-sent event of a streamed reply.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StreamEvent {
    /// A piece of reply text.
    Chunk {
        /// The text.
        content: String,
    },
    /// The reply completed and was recorded.
    Done {
        /// The recorded assistant message.
        message: ChatMessage,
    },
    /// The reply failed; nothing was recorded for it.
    Error {
        /// What went wrong.
        error: String,
    },
}

impl StreamEvent {
    fn to_event(&self) -> Result<Event> {
        let data = serde_json::to_string(self)?;
        Ok(Event::default().data(data))
    }
}

#[derive(Debug, Deserialize)]
struct CreateChatBody {
    #[serde(default)]
    id: String,
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
struct UpdateChatBody {
    #[serde(default)]
    title: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SendBody {
    #[serde(default)]
    user_message_id: String,
    #[serde(default)]
    content: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct Health {
    status: &'static str,
}

/// Builds the router for `session`.
pub fn router<B, S>(session: SharedSession<B, S>) -> Router
where
    B: Backend + 'static,
    S: ChatStore + 'static,
{
    Router::new()
        .route("/health", get(health))
        .route(
            "/api/chats",
            get(list_chats::<B, S>).post(create_chat::<B, S>),
        )
        .route(
            "/api/chats/{id}",
            get(get_chat::<B, S>)
                .put(update_chat::<B, S>)
                .delete(delete_chat::<B, S>),
        )
        .route("/api/chats/{id}/send", post(send_message::<B, S>))
        .with_state(session)
}

/// Serves `router` on `listener` until interrupted.
pub async fn serve(listener: TcpListener, router: Router) -> Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "serving chat api");
    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down");
        })
        .await?;
    Ok(())
}

async fn health() -> Json<Health> {
    Json(Health { status: "ok" })
}

async fn list_chats<B: Backend + 'static, S: ChatStore + 'static>(
    State(session): State<SharedSession<B, S>>,
) -> std::result::Result<Json<Vec<Conversation>>, ApiError> {
    Ok(Json(session.list_conversations().await?))
}

async fn create_chat<B: Backend + 'static, S: ChatStore + 'static>(
    State(session): State<SharedSession<B, S>>,
    body: std::result::Result<Json<CreateChatBody>, JsonRejection>,
) -> std::result::Result<(StatusCode, Json<Conversation>), ApiError> {
    let Json(body) = body?;
    let conversation = session.create_conversation(&body.id, &body.title).await?;
    Ok((StatusCode::CREATED, Json(conversation)))
}

async fn get_chat<B: Backend + 'static, S: ChatStore + 'static>(
    State(session): State<SharedSession<B, S>>,
    Path(id): Path<String>,
) -> std::result::Result<Json<ConversationWithMessages>, ApiError> {
    Ok(Json(session.conversation_with_messages(&id).await?))
}

async fn update_chat<B: Backend + 'static, S: ChatStore + 'static>(
    State(session): State<SharedSession<B, S>>,
    Path(id): Path<String>,
    body: std::result::Result<Json<UpdateChatBody>, JsonRejection>,
) -> std::result::Result<Json<Conversation>, ApiError> {
    let Json(body) = body?;
    Ok(Json(session.rename_conversation(&id, &body.title).await?))
}

async fn delete_chat<B: Backend + 'static, S: ChatStore + 'static>(
    State(session): State<SharedSession<B, S>>,
    Path(id): Path<String>,
) -> std::result::Result<StatusCode, ApiError> {
    session.delete_conversation(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn send_message<B: Backend + 'static, S: ChatStore + 'static>(
    State(session): State<SharedSession<B, S>>,
    Path(id): Path<String>,
    body: std::result::Result<Json<SendBody>, JsonRejection>,
) -> std::result::Result<Response, ApiError> {
    let Json(body) = body?;
    if body.user_message_id.trim().is_empty() {
        return Err(Error::validation(
            "userMessageId is required",
            Some("userMessageId".to_string()),
        )
        .into());
    }
    let mut request = SendRequest::new(id, body.content).with_user_message_id(body.user_message_id);
    request.model = body.model;

    if !body.stream {
        let message = session.send(request).await?;
        return Ok((StatusCode::CREATED, Json(message)).into_response());
    }

    // Reject bad requests with a status code before committing to a stream.
    session.validate_request(&request).await?;

    let (tx, rx) = mpsc::unbounded_channel::<Event>();
    tokio::spawn(async move {
        let chunk_tx = tx.clone();
        let result = session
            .send_streaming(request, move |text| {
                let event = StreamEvent::Chunk {
                    content: text.to_string(),
                }
                .to_event()?;
                chunk_tx
                    .send(event)
                    .map_err(|_| Error::consumer_aborted("client disconnected"))
            })
            .await;
        let last = match result {
            Ok(message) => StreamEvent::Done { message },
            Err(err) if err.is_consumer_aborted() => return,
            Err(err) => StreamEvent::Error {
                error: err.to_string(),
            },
        };
        if let Ok(event) = last.to_event() {
            let _ = tx.send(event);
        }
    });

    let events = stream::unfold(rx, |mut rx| async move {
        rx.recv()
            .await
            .map(|event| (Ok::<Event, Infallible>(event), rx))
    });
    Ok(Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_statuses() {
        let cases = [
            (Error::validation("x", None), StatusCode::BAD_REQUEST),
            (Error::not_found("x", None, None), StatusCode::NOT_FOUND),
            (Error::conflict("x"), StatusCode::CONFLICT),
            (Error::backend_unavailable("x", None), StatusCode::BAD_GATEWAY),
            (Error::model_not_found("m"), StatusCode::BAD_GATEWAY),
            (Error::backend(500, "x"), StatusCode::BAD_GATEWAY),
            (Error::EmptyResponse, StatusCode::BAD_GATEWAY),
            (Error::timeout("x", None), StatusCode::GATEWAY_TIMEOUT),
            (
                Error::io("x", std::io::Error::other("disk")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(status_for(&err), status, "error: {err}");
        }
    }

    #[test]
    fn stream_event_wire_format() {
        let chunk = serde_json::to_value(StreamEvent::Chunk {
            content: "ls".to_string(),
        })
        .unwrap();
        assert_eq!(chunk, serde_json::json!({"type": "chunk", "content": "ls"}));

        let error = serde_json::to_value(StreamEvent::Error {
            error: "boom".to_string(),
        })
        .unwrap();
        assert_eq!(error, serde_json::json!({"type": "error", "error": "boom"}));
    }

    #[test]
    fn send_body_uses_camel_case() {
        let body: SendBody =
            serde_json::from_str(r#"{"userMessageId":"u1","content":"hi","stream":true}"#).unwrap();
        assert_eq!(body.user_message_id, "u1");
        assert!(body.stream);
        assert!(body.model.is_none());
    }
}
