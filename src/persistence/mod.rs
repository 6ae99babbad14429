//! Durable storage for conversations
//!
//! The in-memory [`ConversationStore`](crate::conversation::ConversationStore)
//! is authoritative; the repository is a best-effort mirror used to survive
//! restarts.

pub mod sqlite;

pub use sqlite::SqliteRepository;

use crate::conversation::{Conversation, Message};

/// Error type for persistence operations
#[derive(Debug, thiserror::Error)]
pub enum PersistenceError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("corrupt record: {0}")]
    Corrupt(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage task failed: {0}")]
    Task(String),
}

/// Storage backend for conversations
///
/// Every write is its own transaction. Deleting a conversation also deletes
/// its messages and their tool-call requests.
pub trait ConversationRepository: Send + Sync {
    /// Insert the conversation, or update its `updated_at` if it exists
    fn save_conversation(&self, conversation: &Conversation) -> Result<(), PersistenceError>;

    /// Append a message (with any tool-call requests) and touch the conversation
    fn save_message(&self, conversation_id: &str, message: &Message)
        -> Result<(), PersistenceError>;

    fn load_conversation(&self, id: &str) -> Result<Option<Conversation>, PersistenceError>;

    /// Conversation ids, most recently updated first
    fn list_conversation_ids(&self) -> Result<Vec<String>, PersistenceError>;

    /// Returns whether a conversation was deleted
    fn delete_conversation(&self, id: &str) -> Result<bool, PersistenceError>;
}
