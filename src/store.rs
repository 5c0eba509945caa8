//! Conversation and message storage.
//!
//! [`ChatStore`] is the persistence contract used by [`crate::ChatSession`].
//! Two implementations are provided: [`MemoryStore`] keeps everything in
//! process, and [`SqliteStore`] keeps conversations in a SQLite database.
//!
//! Within one conversation, message timestamps are strictly increasing, and
//! appending a message touches the conversation's `updated_at` under the same
//! lock (or transaction), so a listing never shows a message without its
//! touch or the reverse.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tokio::sync::Mutex;

use crate::error::{Error, Result};

/// Who wrote a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// The person chatting.
    User,
    /// The model.
    Assistant,
}

impl Role {
    /// Returns the lowercase wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A named container for an ordered sequence of messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    /// Client-chosen identifier.
    pub id: String,
    /// Display title.
    pub title: String,
    /// When the conversation was created.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    /// Last time the conversation or one of its messages changed.
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
}

impl Conversation {
    /// Creates a conversation stamped with the current time.
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        let now = OffsetDateTime::now_utc();
        Self {
            id: id.into(),
            title: title.into(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// One message within a conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Message identifier, unique across the store.
    pub id: String,
    /// The conversation this message belongs to.
    pub chat_id: String,
    /// Author.
    pub role: Role,
    /// Message text.
    pub content: String,
    /// Assigned by the store when the message is appended.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
}

impl ChatMessage {
    /// Creates a message; the store replaces `created_at` on append.
    pub fn new(
        id: impl Into<String>,
        chat_id: impl Into<String>,
        role: Role,
        content: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            chat_id: chat_id.into(),
            role,
            content: content.into(),
            created_at: OffsetDateTime::now_utc(),
        }
    }
}

/// A conversation together with all of its messages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConversationWithMessages {
    /// The conversation record.
    #[serde(flatten)]
    pub conversation: Conversation,
    /// Messages in creation order.
    pub messages: Vec<ChatMessage>,
}

/// Persistence for conversations and messages.
#[async_trait::async_trait]
pub trait ChatStore: Send + Sync {
    /// Stores a new conversation.  Fails with [`Error::Conflict`] if the id
    /// is taken.
    async fn create_conversation(&self, conversation: Conversation) -> Result<Conversation>;

    /// Looks up a conversation by id.
    async fn conversation(&self, id: &str) -> Result<Option<Conversation>>;

    /// Lists conversations, most recently updated first.
    async fn conversations(&self) -> Result<Vec<Conversation>>;

    /// Changes a conversation's title and touches `updated_at`.
    async fn rename_conversation(&self, id: &str, title: &str) -> Result<Conversation>;

    /// Removes a conversation and all of its messages.
    async fn delete_conversation(&self, id: &str) -> Result<()>;

    /// Appends a message, assigning its timestamp and touching the parent
    /// conversation.  Returns the message as stored.
    async fn append_message(&self, message: ChatMessage) -> Result<ChatMessage>;

    /// Lists a conversation's messages in creation order.
    async fn messages(&self, chat_id: &str) -> Result<Vec<ChatMessage>>;

    /// Looks up a message by id in any conversation.
    async fn message(&self, id: &str) -> Result<Option<ChatMessage>>;
}

#[async_trait::async_trait]
impl<S: ChatStore + ?Sized> ChatStore for Arc<S> {
    async fn create_conversation(&self, conversation: Conversation) -> Result<Conversation> {
        (**self).create_conversation(conversation).await
    }

    async fn conversation(&self, id: &str) -> Result<Option<Conversation>> {
        (**self).conversation(id).await
    }

    async fn conversations(&self) -> Result<Vec<Conversation>> {
        (**self).conversations().await
    }

    async fn rename_conversation(&self, id: &str, title: &str) -> Result<Conversation> {
        (**self).rename_conversation(id, title).await
    }

    async fn delete_conversation(&self, id: &str) -> Result<()> {
        (**self).delete_conversation(id).await
    }

    async fn append_message(&self, message: ChatMessage) -> Result<ChatMessage> {
        (**self).append_message(message).await
    }

    async fn messages(&self, chat_id: &str) -> Result<Vec<ChatMessage>> {
        (**self).messages(chat_id).await
    }

    async fn message(&self, id: &str) -> Result<Option<ChatMessage>> {
        (**self).message(id).await
    }
}

///////////////////////////////////////////// State ////////////////////////////////////////////

fn conversation_not_found(id: &str) -> Error {
    Error::not_found(
        format!("conversation {id} does not exist"),
        Some("conversation".to_string()),
        Some(id.to_string()),
    )
}

#[derive(Debug, Default)]
struct StoreState {
    conversations: BTreeMap<String, Conversation>,
    messages: BTreeMap<String, Vec<ChatMessage>>,
    message_chats: BTreeMap<String, String>,
}

impl StoreState {
    fn create_conversation(&mut self, conversation: Conversation) -> Result<Conversation> {
        if self.conversations.contains_key(&conversation.id) {
            return Err(Error::conflict(format!(
                "conversation {} already exists",
                conversation.id
            )));
        }
        self.messages.insert(conversation.id.clone(), Vec::new());
        self.conversations
            .insert(conversation.id.clone(), conversation.clone());
        Ok(conversation)
    }

    fn conversations(&self) -> Vec<Conversation> {
        let mut conversations: Vec<Conversation> = self.conversations.values().cloned().collect();
        conversations.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        conversations
    }

    fn rename_conversation(&mut self, id: &str, title: &str) -> Result<Conversation> {
        let conversation = self
            .conversations
            .get_mut(id)
            .ok_or_else(|| conversation_not_found(id))?;
        conversation.title = title.to_string();
        conversation.updated_at = conversation.updated_at.max(OffsetDateTime::now_utc());
        Ok(conversation.clone())
    }

    fn delete_conversation(&mut self, id: &str) -> Result<()> {
        if self.conversations.remove(id).is_none() {
            return Err(conversation_not_found(id));
        }
        for message in self.messages.remove(id).unwrap_or_default() {
            self.message_chats.remove(&message.id);
        }
        Ok(())
    }

    fn append_message(&mut self, mut message: ChatMessage) -> Result<ChatMessage> {
        if !self.conversations.contains_key(&message.chat_id) {
            return Err(conversation_not_found(&message.chat_id));
        }
        if self.message_chats.contains_key(&message.id) {
            return Err(Error::conflict(format!(
                "message {} already exists",
                message.id
            )));
        }

        let thread = self.messages.entry(message.chat_id.clone()).or_default();
        let now = OffsetDateTime::now_utc();
        message.created_at = match thread.last() {
            Some(last) => now.max(last.created_at + time::Duration::microseconds(1)),
            None => now,
        };
        thread.push(message.clone());
        self.message_chats
            .insert(message.id.clone(), message.chat_id.clone());

        if let Some(conversation) = self.conversations.get_mut(&message.chat_id) {
            conversation.updated_at = conversation.updated_at.max(message.created_at);
        }
        Ok(message)
    }

    fn messages(&self, chat_id: &str) -> Result<Vec<ChatMessage>> {
        if !self.conversations.contains_key(chat_id) {
            return Err(conversation_not_found(chat_id));
        }
        Ok(self.messages.get(chat_id).cloned().unwrap_or_default())
    }

    fn message(&self, id: &str) -> Option<ChatMessage> {
        let chat_id = self.message_chats.get(id)?;
        self.messages
            .get(chat_id)?
            .iter()
            .find(|message| message.id == id)
            .cloned()
    }
}

////////////////////////////////////////// MemoryStore /////////////////////////////////////////

/// An in-process store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    state: Mutex<StoreState>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait::async_trait]
impl ChatStore for MemoryStore {
    async fn create_conversation(&self, conversation: Conversation) -> Result<Conversation> {
        self.state.lock().await.create_conversation(conversation)
    }

    async fn conversation(&self, id: &str) -> Result<Option<Conversation>> {
        Ok(self.state.lock().await.conversations.get(id).cloned())
    }

    async fn conversations(&self) -> Result<Vec<Conversation>> {
        Ok(self.state.lock().await.conversations())
    }

    async fn rename_conversation(&self, id: &str, title: &str) -> Result<Conversation> {
        self.state.lock().await.rename_conversation(id, title)
    }

    async fn delete_conversation(&self, id: &str) -> Result<()> {
        self.state.lock().await.delete_conversation(id)
    }

    async fn append_message(&self, message: ChatMessage) -> Result<ChatMessage> {
        self.state.lock().await.append_message(message)
    }

    async fn messages(&self, chat_id: &str) -> Result<Vec<ChatMessage>> {
        self.state.lock().await.messages(chat_id)
    }

    async fn message(&self, id: &str) -> Result<Option<ChatMessage>> {
        Ok(self.state.lock().await.message(id))
    }
}

////////////////////////////////////////// SqliteStore /////////////////////////////////////////

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS chats (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    );

    CREATE TABLE IF NOT EXISTS messages (
        id TEXT PRIMARY KEY,
        chat_id TEXT NOT NULL REFERENCES chats(id) ON DELETE CASCADE,
        role TEXT NOT NULL,
        content TEXT NOT NULL,
        created_at INTEGER NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_messages_chat_created ON messages(chat_id, created_at);
    CREATE INDEX IF NOT EXISTS idx_chats_updated ON chats(updated_at);
";

const CHAT_COLUMNS: &str = "id, title, created_at, updated_at";
const MESSAGE_COLUMNS: &str = "id, chat_id, role, content, created_at";

/// A store backed by a SQLite database.
///
/// Timestamps are kept as microseconds since the Unix epoch.  Appending a
/// message and touching its conversation happen in one transaction, and
/// deleting a conversation cascades to its messages through the foreign key.
#[derive(Debug)]
pub struct SqliteStore {
    path: PathBuf,
    conn: Arc<std::sync::Mutex<Connection>>,
}

impl SqliteStore {
    /// Opens (creating if needed) the database at `path`.
    pub async fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let target = path.clone();
        let conn = tokio::task::spawn_blocking(move || open_connection(&target))
            .await
            .map_err(join_error)??;
        tracing::info!(path = %path.display(), "opened chat store");
        Ok(Self {
            path,
            conn: Arc::new(std::sync::Mutex::new(conn)),
        })
    }

    /// Returns the database file backing this store.
    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut Connection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut conn = conn
                .lock()
                .map_err(|_| Error::storage("chat store lock poisoned", None))?;
            f(&mut conn)
        })
        .await
        .map_err(join_error)?
    }
}

fn open_connection(path: &Path) -> Result<Connection> {
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)?;
    }
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "synchronous", "FULL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

fn join_error(err: tokio::task::JoinError) -> Error {
    Error::storage(format!("chat store task failed: {err}"), Some(Box::new(err)))
}

fn to_micros(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000) as i64
}

fn from_micros(micros: i64) -> Result<OffsetDateTime> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(micros) * 1_000).map_err(|err| {
        Error::storage(format!("invalid timestamp {micros}"), Some(Box::new(err)))
    })
}

fn column_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<OffsetDateTime> {
    let micros: i64 = row.get(idx)?;
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(micros) * 1_000)
        .map_err(|err| rusqlite::Error::FromSqlConversionFailure(idx, Type::Integer, Box::new(err)))
}

fn read_conversation(row: &Row<'_>) -> rusqlite::Result<Conversation> {
    Ok(Conversation {
        id: row.get(0)?,
        title: row.get(1)?,
        created_at: column_timestamp(row, 2)?,
        updated_at: column_timestamp(row, 3)?,
    })
}

fn read_message(row: &Row<'_>) -> rusqlite::Result<ChatMessage> {
    let role: String = row.get(2)?;
    let role = match role.as_str() {
        "user" => Role::User,
        "assistant" => Role::Assistant,
        other => {
            return Err(rusqlite::Error::FromSqlConversionFailure(
                2,
                Type::Text,
                format!("unknown role {other:?}").into(),
            ));
        }
    };
    Ok(ChatMessage {
        id: row.get(0)?,
        chat_id: row.get(1)?,
        role,
        content: row.get(3)?,
        created_at: column_timestamp(row, 4)?,
    })
}

fn chat_exists(conn: &Connection, id: &str) -> Result<bool> {
    Ok(conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM chats WHERE id = ?1)",
        [id],
        |row| row.get(0),
    )?)
}

#[async_trait::async_trait]
impl ChatStore for SqliteStore {
    async fn create_conversation(&self, conversation: Conversation) -> Result<Conversation> {
        self.with_conn(move |conn| {
            let created_at = from_micros(to_micros(conversation.created_at))?;
            let updated_at = from_micros(to_micros(conversation.updated_at))?;
            let inserted = conn.execute(
                "INSERT INTO chats (id, title, created_at, updated_at) VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT(id) DO NOTHING",
                params![
                    conversation.id,
                    conversation.title,
                    to_micros(created_at),
                    to_micros(updated_at)
                ],
            )?;
            if inserted == 0 {
                return Err(Error::conflict(format!(
                    "conversation {} already exists",
                    conversation.id
                )));
            }
            Ok(Conversation {
                created_at,
                updated_at,
                ..conversation
            })
        })
        .await
    }

    async fn conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = ?1"),
                    [&id],
                    read_conversation,
                )
                .optional()?)
        })
        .await
    }

    async fn conversations(&self) -> Result<Vec<Conversation>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {CHAT_COLUMNS} FROM chats ORDER BY updated_at DESC, id ASC"
            ))?;
            let rows = stmt.query_map([], read_conversation)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn rename_conversation(&self, id: &str, title: &str) -> Result<Conversation> {
        let id = id.to_string();
        let title = title.to_string();
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let current = tx
                .query_row(
                    &format!("SELECT {CHAT_COLUMNS} FROM chats WHERE id = ?1"),
                    [&id],
                    read_conversation,
                )
                .optional()?
                .ok_or_else(|| conversation_not_found(&id))?;
            let now = from_micros(to_micros(OffsetDateTime::now_utc()))?;
            let updated_at = current.updated_at.max(now);
            tx.execute(
                "UPDATE chats SET title = ?2, updated_at = ?3 WHERE id = ?1",
                params![id, title, to_micros(updated_at)],
            )?;
            tx.commit()?;
            Ok(Conversation {
                title,
                updated_at,
                ..current
            })
        })
        .await
    }

    async fn delete_conversation(&self, id: &str) -> Result<()> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            if conn.execute("DELETE FROM chats WHERE id = ?1", [&id])? == 0 {
                return Err(conversation_not_found(&id));
            }
            Ok(())
        })
        .await
    }

    async fn append_message(&self, mut message: ChatMessage) -> Result<ChatMessage> {
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            if !chat_exists(&tx, &message.chat_id)? {
                return Err(conversation_not_found(&message.chat_id));
            }
            let last: Option<i64> = tx.query_row(
                "SELECT MAX(created_at) FROM messages WHERE chat_id = ?1",
                [&message.chat_id],
                |row| row.get(0),
            )?;
            let now = to_micros(OffsetDateTime::now_utc());
            let created_at = match last {
                Some(last) => now.max(last + 1),
                None => now,
            };
            let inserted = tx.execute(
                "INSERT INTO messages (id, chat_id, role, content, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO NOTHING",
                params![
                    message.id,
                    message.chat_id,
                    message.role.as_str(),
                    message.content,
                    created_at
                ],
            )?;
            if inserted == 0 {
                return Err(Error::conflict(format!(
                    "message {} already exists",
                    message.id
                )));
            }
            tx.execute(
                "UPDATE chats SET updated_at = MAX(updated_at, ?2) WHERE id = ?1",
                params![message.chat_id, created_at],
            )?;
            tx.commit()?;
            message.created_at = from_micros(created_at)?;
            Ok(message)
        })
        .await
    }

    async fn messages(&self, chat_id: &str) -> Result<Vec<ChatMessage>> {
        let chat_id = chat_id.to_string();
        self.with_conn(move |conn| {
            if !chat_exists(conn, &chat_id)? {
                return Err(conversation_not_found(&chat_id));
            }
            let mut stmt = conn.prepare(&format!(
                "SELECT {MESSAGE_COLUMNS} FROM messages WHERE chat_id = ?1
                 ORDER BY created_at ASC, rowid ASC"
            ))?;
            let rows = stmt.query_map([&chat_id], read_message)?;
            Ok(rows.collect::<rusqlite::Result<Vec<_>>>()?)
        })
        .await
    }

    async fn message(&self, id: &str) -> Result<Option<ChatMessage>> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            Ok(conn
                .query_row(
                    &format!("SELECT {MESSAGE_COLUMNS} FROM messages WHERE id = ?1"),
                    [&id],
                    read_message,
                )
                .optional()?)
        })
        .await
    }
}
