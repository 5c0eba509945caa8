//! Persistent chat sessions.
//!
//! A [`ChatSession`] ties a backend to a [`ChatStore`].  Sending a message
//! records the user turn, asks the model for a reply (streamed or not), and
//! records the reply only once it is known to be complete.

use crate::backend::Backend;
use crate::bridge::{StreamBridge, StreamFailure};
use crate::config::ClaiConfig;
use crate::error::{Error, Result};
use crate::observability::{MESSAGES_PERSISTED, REPLIES_DISCARDED};
use crate::store::{ChatMessage, ChatStore, Conversation, ConversationWithMessages, Role};

/// Title given to conversations created without one.
pub const DEFAULT_TITLE: &str = "New Chat";

/// Generates an identifier for a server-created record.
pub fn new_message_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// A message to send within a conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SendRequest {
    /// The conversation to append to.
    pub chat_id: String,
    /// Client-chosen id for the user message; generated when absent.
    pub user_message_id: Option<String>,
    /// The message text.
    pub content: String,
    /// Overrides the configured model for this message.
    pub model: Option<String>,
}

impl SendRequest {
    /// Creates a request with a generated message id and the default model.
    pub fn new(chat_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            chat_id: chat_id.into(),
            user_message_id: None,
            content: content.into(),
            model: None,
        }
    }

    /// Sets the id of the user message.
    pub fn with_user_message_id(mut self, id: impl Into<String>) -> Self {
        self.user_message_id = Some(id.into());
        self
    }

    /// Sets the model used for the reply.
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }
}

/// A chat session backed by a store.
pub struct ChatSession<B: Backend, S: ChatStore> {
    bridge: StreamBridge<B>,
    store: S,
    config: ClaiConfig,
}

impl<B: Backend, S: ChatStore> ChatSession<B, S> {
    /// Creates a session that talks to `backend` and records to `store`.
    pub fn new(backend: B, store: S, config: ClaiConfig) -> Self {
        Self {
            bridge: StreamBridge::new(backend),
            store,
            config,
        }
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ClaiConfig {
        &self.config
    }

    /// Returns the default model.
    pub fn model(&self) -> &str {
        &self.config.model
    }

    /// Changes the default model.
    pub fn set_model(&mut self, model: impl Into<String>) {
        self.config.model = model.into();
    }

    /// Returns the underlying store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Sends a message and waits for the complete reply.
    ///
    /// The user message is recorded before the backend is called.  On
    /// success the assistant reply is recorded and returned; on failure
    /// nothing further is recorded.
    pub async fn send(&self, request: SendRequest) -> Result<ChatMessage> {
        let model = self.validate_request(&request).await?;
        self.record_user(&request).await?;

        let reply = match self
            .bridge
            .backend()
            .generate(&model, &request.content, self.config.chat_timeout)
            .await
        {
            Ok(reply) => reply,
            Err(err) => {
                REPLIES_DISCARDED.click();
                tracing::warn!(chat_id = %request.chat_id, %model, error = %err, "chat reply failed");
                return Err(err);
            }
        };
        let reply = reply.trim();
        if reply.is_empty() {
            REPLIES_DISCARDED.click();
            return Err(Error::EmptyResponse);
        }
        self.record_assistant(&request.chat_id, reply).await
    }

    /// Sends a message and relays the reply through `on_chunk` as it streams.
    ///
    /// The assistant reply is recorded only if the stream completes with
    /// some text; an empty reply is [`Error::EmptyResponse`].  If
    /// `on_chunk` fails the stream stops, the error is
    /// [`Error::ConsumerAborted`], and only the user message remains.
    pub async fn send_streaming<F>(&self, request: SendRequest, on_chunk: F) -> Result<ChatMessage>
    where
        F: FnMut(&str) -> Result<()>,
    {
        let model = self.validate_request(&request).await?;
        self.record_user(&request).await?;

        match self.bridge.stream(&model, &request.content, on_chunk).await {
            Ok(text) if text.trim().is_empty() => {
                REPLIES_DISCARDED.click();
                tracing::warn!(chat_id = %request.chat_id, %model, "streamed reply was empty");
                Err(Error::EmptyResponse)
            }
            Ok(text) => self.record_assistant(&request.chat_id, &text).await,
            Err(StreamFailure { partial, error }) => {
                REPLIES_DISCARDED.click();
                if error.is_consumer_aborted() {
                    tracing::debug!(chat_id = %request.chat_id, bytes = partial.len(), "streamed reply abandoned");
                } else {
                    tracing::warn!(chat_id = %request.chat_id, %model, %error, bytes = partial.len(), "streamed reply failed");
                }
                Err(error)
            }
        }
    }

    /// Creates a conversation; an empty title becomes [`DEFAULT_TITLE`].
    pub async fn create_conversation(&self, id: &str, title: &str) -> Result<Conversation> {
        if id.trim().is_empty() {
            return Err(Error::validation(
                "conversation id is required",
                Some("id".to_string()),
            ));
        }
        let title = title.trim();
        let title = if title.is_empty() { DEFAULT_TITLE } else { title };
        self.store
            .create_conversation(Conversation::new(id, title))
            .await
    }

    /// Lists conversations, most recently updated first.
    pub async fn list_conversations(&self) -> Result<Vec<Conversation>> {
        self.store.conversations().await
    }

    /// Returns a conversation and its messages.
    pub async fn conversation_with_messages(&self, id: &str) -> Result<ConversationWithMessages> {
        let conversation = self.require_conversation(id).await?;
        let messages = self.store.messages(id).await?;
        Ok(ConversationWithMessages {
            conversation,
            messages,
        })
    }

    /// Changes a conversation's title.  The title may not be empty.
    pub async fn rename_conversation(&self, id: &str, title: &str) -> Result<Conversation> {
        let title = title.trim();
        if title.is_empty() {
            return Err(Error::validation(
                "title is required",
                Some("title".to_string()),
            ));
        }
        self.store.rename_conversation(id, title).await
    }

    /// Deletes a conversation and its messages.
    pub async fn delete_conversation(&self, id: &str) -> Result<()> {
        self.store.delete_conversation(id).await
    }

    async fn require_conversation(&self, id: &str) -> Result<Conversation> {
        self.store.conversation(id).await?.ok_or_else(|| {
            Error::not_found(
                format!("conversation {id} does not exist"),
                Some("conversation".to_string()),
                Some(id.to_string()),
            )
        })
    }

    /// Checks a request without writing anything and returns the model its
    /// reply will use.  A user message id that is already taken is a
    /// conflict.
    pub async fn validate_request(&self, request: &SendRequest) -> Result<String> {
        if request.content.trim().is_empty() {
            return Err(Error::validation(
                "content is required",
                Some("content".to_string()),
            ));
        }
        self.config.validate_prompt(&request.content)?;
        self.require_conversation(&request.chat_id).await?;
        if let Some(id) = request
            .user_message_id
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            && self.store.message(id).await?.is_some()
        {
            return Err(Error::conflict(format!("message {id} already exists")));
        }
        Ok(request
            .model
            .as_deref()
            .filter(|model| !model.trim().is_empty())
            .unwrap_or(self.config.model.as_str())
            .to_string())
    }

    async fn record_user(&self, request: &SendRequest) -> Result<ChatMessage> {
        let id = request
            .user_message_id
            .clone()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or_else(new_message_id);
        let message = ChatMessage::new(id, &request.chat_id, Role::User, &request.content);
        let stored = self.store.append_message(message).await?;
        MESSAGES_PERSISTED.click();
        Ok(stored)
    }

    async fn record_assistant(&self, chat_id: &str, content: &str) -> Result<ChatMessage> {
        let message = ChatMessage::new(new_message_id(), chat_id, Role::Assistant, content);
        let stored = self.store.append_message(message).await?;
        MESSAGES_PERSISTED.click();
        tracing::debug!(chat_id, message_id = %stored.id, "assistant reply recorded");
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::StreamChunk;
    use crate::backend::fake::ScriptedBackend;
    use crate::store::MemoryStore;

    async fn session_with(backend: ScriptedBackend) -> ChatSession<ScriptedBackend, MemoryStore> {
        let session = ChatSession::new(
            backend,
            MemoryStore::new(),
            ClaiConfig::new().with_model("llama3").with_max_prompt_length(20),
        );
        session.create_conversation("c1", "").await.unwrap();
        session
    }

    fn script(parts: &[&str]) -> Vec<Result<StreamChunk>> {
        let mut script: Vec<Result<StreamChunk>> =
            parts.iter().map(|p| Ok(StreamChunk::text(*p))).collect();
        script.push(Ok(StreamChunk::done()));
        script
    }

    #[tokio::test]
    async fn empty_title_becomes_default() {
        let session = session_with(ScriptedBackend::new()).await;
        let listed = session.list_conversations().await.unwrap();
        assert_eq!(listed[0].title, DEFAULT_TITLE);
    }

    #[tokio::test]
    async fn streaming_send_records_both_turns() {
        let session = session_with(ScriptedBackend::streaming(script(&["Hi", " there"]))).await;
        let mut relayed = String::new();
        let reply = session
            .send_streaming(
                SendRequest::new("c1", "hello").with_user_message_id("u1"),
                |chunk| {
                    relayed.push_str(chunk);
                    Ok(())
                },
            )
            .await
            .unwrap();
        assert_eq!(reply.content, "Hi there");
        assert_eq!(reply.role, Role::Assistant);
        assert_eq!(relayed, "Hi there");

        let full = session.conversation_with_messages("c1").await.unwrap();
        let roles: Vec<Role> = full.messages.iter().map(|m| m.role).collect();
        assert_eq!(roles, vec![Role::User, Role::Assistant]);
        assert_eq!(full.messages[0].id, "u1");
        assert_eq!(full.messages[0].content, "hello");
    }

    #[tokio::test]
    async fn aborted_stream_leaves_only_user_message() {
        let session = session_with(ScriptedBackend::streaming(script(&["a", "b", "c"]))).await;
        let err = session
            .send_streaming(SendRequest::new("c1", "hello"), |_| {
                Err(Error::consumer_aborted("client disconnected"))
            })
            .await
            .unwrap_err();
        assert!(err.is_consumer_aborted());
        let messages = session.store().messages("c1").await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);
    }

    #[tokio::test]
    async fn failed_stream_records_no_reply() {
        let session = session_with(ScriptedBackend::streaming(vec![
            Ok(StreamChunk::text("par")),
            Ok(StreamChunk::error("model \"llama3\" not found")),
        ]))
        .await;
        let err = session
            .send_streaming(SendRequest::new("c1", "hello"), |_| Ok(()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ModelNotFound { .. }));
        assert_eq!(session.store().messages("c1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn empty_stream_records_no_reply() {
        let session = session_with(ScriptedBackend::streaming(vec![
            Ok(StreamChunk::text("  \n")),
            Ok(StreamChunk::done()),
        ]))
        .await;
        let err = session
            .send_streaming(SendRequest::new("c1", "hello"), |_| Ok(()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmptyResponse));
        let messages = session.store().messages("c1").await.unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].role, Role::User);

        let session = session_with(ScriptedBackend::streaming(vec![Ok(StreamChunk::done())])).await;
        let err = session
            .send_streaming(SendRequest::new("c1", "hello"), |_| Ok(()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::EmptyResponse));
        assert_eq!(session.store().messages("c1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn plain_send_trims_reply() {
        let backend = ScriptedBackend::replying(Ok("  Sure thing.\n".to_string()));
        let session = session_with(backend).await;
        let reply = session
            .send(SendRequest::new("c1", "hello").with_model("mistral"))
            .await
            .unwrap();
        assert_eq!(reply.content, "Sure thing.");
        assert_eq!(
            session.bridge.backend().models.lock().unwrap().as_slice(),
            ["mistral"]
        );
        assert_eq!(session.bridge.backend().prompts.lock().unwrap()[0], "hello");
    }

    #[tokio::test]
    async fn plain_send_failure_records_no_reply() {
        let backend = ScriptedBackend::replying(Err(Error::timeout("chat", Some(120.0))));
        let session = session_with(backend).await;
        let err = session
            .send(SendRequest::new("c1", "hello"))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert_eq!(session.store().messages("c1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_requests_write_nothing() {
        let session = session_with(ScriptedBackend::streaming(script(&["x"]))).await;

        let err = session
            .send(SendRequest::new("c1", "   "))
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let err = session
            .send(SendRequest::new("c1", "x".repeat(21)))
            .await
            .unwrap_err();
        assert!(err.is_validation());

        let err = session
            .send_streaming(SendRequest::new("missing", "hello"), |_| Ok(()))
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        assert!(session.store().messages("c1").await.unwrap().is_empty());
        assert_eq!(session.bridge.backend().call_count(), 0);
    }

    #[tokio::test]
    async fn duplicate_user_message_id_conflicts() {
        let session = session_with(ScriptedBackend::streaming(script(&["x"]))).await;
        session
            .send_streaming(SendRequest::new("c1", "one").with_user_message_id("u1"), |_| Ok(()))
            .await
            .unwrap();
        let err = session
            .send_streaming(SendRequest::new("c1", "two").with_user_message_id("u1"), |_| Ok(()))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(session.bridge.backend().call_count(), 1);

        // The conflict is found before anything is written.
        let err = session
            .validate_request(&SendRequest::new("c1", "three").with_user_message_id("u1"))
            .await
            .unwrap_err();
        assert!(err.is_conflict());
        assert_eq!(session.store().messages("c1").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn rename_requires_title() {
        let session = session_with(ScriptedBackend::new()).await;
        assert!(
            session
                .rename_conversation("c1", " ")
                .await
                .unwrap_err()
                .is_validation()
        );
        let renamed = session.rename_conversation("c1", "Shell tips").await.unwrap();
        assert_eq!(renamed.title, "Shell tips");
    }

    #[tokio::test]
    async fn delete_removes_messages() {
        let session = session_with(ScriptedBackend::streaming(script(&["x"]))).await;
        session
            .send_streaming(SendRequest::new("c1", "hello"), |_| Ok(()))
            .await
            .unwrap();
        session.delete_conversation("c1").await.unwrap();
        assert!(
            session
                .conversation_with_messages("c1")
                .await
                .unwrap_err()
                .is_not_found()
        );
        assert!(session.list_conversations().await.unwrap().is_empty());
    }

    #[test]
    fn generated_ids_are_hex() {
        let id = new_message_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
