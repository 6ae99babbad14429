//! SQLite-backed conversation repository

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::{ConversationRepository, PersistenceError};
use crate::conversation::{Conversation, Message, Role, ToolCallRequest};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS conversations (
    id TEXT PRIMARY KEY,
    created_at INTEGER NOT NULL,
    updated_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS messages (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    conversation_id TEXT NOT NULL REFERENCES conversations(id) ON DELETE CASCADE,
    role TEXT NOT NULL,
    content TEXT NOT NULL,
    tool_call_id TEXT
);

CREATE TABLE IF NOT EXISTS tool_calls (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    message_id TEXT NOT NULL REFERENCES messages(id) ON DELETE CASCADE,
    tool_call_id TEXT NOT NULL,
    type TEXT NOT NULL DEFAULT 'function',
    name TEXT NOT NULL,
    arguments TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_conversation ON messages(conversation_id, seq);
CREATE INDEX IF NOT EXISTS idx_tool_calls_message ON tool_calls(message_id);
"#;

/// Conversation repository stored in a single SQLite file
pub struct SqliteRepository {
    conn: Mutex<Connection>,
}

impl SqliteRepository {
    /// Open (or create) the database at `path`, creating parent directories
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        debug!(path = %path.display(), "Opening conversation database");
        Self::with_connection(Connection::open(path)?)
    }

    /// Private in-memory database
    pub fn in_memory() -> Result<Self, PersistenceError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, PersistenceError> {
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl ConversationRepository for SqliteRepository {
    fn save_conversation(&self, conversation: &Conversation) -> Result<(), PersistenceError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        tx.execute(
            "INSERT INTO conversations (id, created_at, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET updated_at = excluded.updated_at",
            params![
                conversation.id,
                conversation.created_at.timestamp_millis(),
                conversation.updated_at.timestamp_millis()
            ],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn save_message(
        &self,
        conversation_id: &str,
        message: &Message,
    ) -> Result<(), PersistenceError> {
        let now = Utc::now().timestamp_millis();
        let mut conn = self.conn();
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT OR IGNORE INTO conversations (id, created_at, updated_at) VALUES (?1, ?2, ?2)",
            params![conversation_id, now],
        )?;
        tx.execute(
            "INSERT INTO messages (id, conversation_id, role, content, tool_call_id)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                message.id,
                conversation_id,
                message.role.as_str(),
                message.content,
                message.tool_call_id
            ],
        )?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO tool_calls (message_id, tool_call_id, type, name, arguments)
                 VALUES (?1, ?2, 'function', ?3, ?4)",
            )?;
            for call in &message.tool_calls {
                stmt.execute(params![message.id, call.id, call.name, call.arguments])?;
            }
        }
        tx.execute(
            "UPDATE conversations SET updated_at = ?2 WHERE id = ?1",
            params![conversation_id, now],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn load_conversation(&self, id: &str) -> Result<Option<Conversation>, PersistenceError> {
        let conn = self.conn();

        let row: Option<(i64, i64)> = conn
            .query_row(
                "SELECT created_at, updated_at FROM conversations WHERE id = ?1",
                params![id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let Some((created_at, updated_at)) = row else {
            return Ok(None);
        };

        let mut calls: HashMap<String, Vec<ToolCallRequest>> = HashMap::new();
        {
            let mut stmt = conn.prepare(
                "SELECT tc.message_id, tc.tool_call_id, tc.name, tc.arguments
                 FROM tool_calls tc JOIN messages m ON m.id = tc.message_id
                 WHERE m.conversation_id = ?1
                 ORDER BY tc.id",
            )?;
            let rows = stmt.query_map(params![id], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    ToolCallRequest {
                        id: row.get(1)?,
                        name: row.get(2)?,
                        arguments: row.get(3)?,
                    },
                ))
            })?;
            for row in rows {
                let (message_id, call) = row?;
                calls.entry(message_id).or_default().push(call);
            }
        }

        let mut stmt = conn.prepare(
            "SELECT id, role, content, tool_call_id FROM messages
             WHERE conversation_id = ?1 ORDER BY seq",
        )?;
        let rows = stmt.query_map(params![id], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, Option<String>>(3)?,
            ))
        })?;

        let mut messages = Vec::new();
        for row in rows {
            let (message_id, role, content, tool_call_id) = row?;
            let role: Role = role.parse().map_err(PersistenceError::Corrupt)?;
            let tool_calls = calls.remove(&message_id).unwrap_or_default();
            messages.push(Message {
                id: message_id,
                role,
                content,
                tool_calls,
                tool_call_id,
            });
        }

        Ok(Some(Conversation::restore(
            id,
            messages,
            from_millis(created_at)?,
            from_millis(updated_at)?,
        )))
    }

    fn list_conversation_ids(&self) -> Result<Vec<String>, PersistenceError> {
        let conn = self.conn();
        let mut stmt =
            conn.prepare("SELECT id FROM conversations ORDER BY updated_at DESC, id ASC")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    fn delete_conversation(&self, id: &str) -> Result<bool, PersistenceError> {
        let mut conn = self.conn();
        let tx = conn.transaction()?;
        let deleted = tx.execute("DELETE FROM conversations WHERE id = ?1", params![id])?;
        tx.commit()?;
        Ok(deleted > 0)
    }
}

fn from_millis(ms: i64) -> Result<DateTime<Utc>, PersistenceError> {
    Utc.timestamp_millis_opt(ms)
        .single()
        .ok_or_else(|| PersistenceError::Corrupt(format!("invalid timestamp {ms}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(id: &str) -> ToolCallRequest {
        ToolCallRequest {
            id: id.to_string(),
            name: "run_command".to_string(),
            arguments: r#"{"command":"ls"}"#.to_string(),
        }
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let repo = SqliteRepository::in_memory().unwrap();
        let conv = Conversation::new("c1");
        repo.save_conversation(&conv).unwrap();

        let messages = vec![
            Message::user("list files"),
            Message::assistant("", vec![call("a"), call("b")]),
            Message::tool("a", "file.txt"),
            Message::tool("b", "other.txt"),
            Message::assistant("Two files.", vec![]),
        ];
        for m in &messages {
            repo.save_message("c1", m).unwrap();
        }

        let loaded = repo.load_conversation("c1").unwrap().unwrap();
        assert_eq!(loaded.messages, messages);
        assert_eq!(loaded.created_at.timestamp_millis(), conv.created_at.timestamp_millis());
    }

    #[test]
    fn test_load_missing_conversation() {
        let repo = SqliteRepository::in_memory().unwrap();
        assert!(repo.load_conversation("nope").unwrap().is_none());
    }

    #[test]
    fn test_save_message_creates_conversation() {
        let repo = SqliteRepository::in_memory().unwrap();
        repo.save_message("implicit", &Message::user("hi")).unwrap();
        assert_eq!(repo.list_conversation_ids().unwrap(), vec!["implicit".to_string()]);
    }

    #[test]
    fn test_duplicate_message_id_rolls_back() {
        let repo = SqliteRepository::in_memory().unwrap();
        let msg = Message::assistant("", vec![call("a")]);
        repo.save_message("c", &msg).unwrap();
        assert!(repo.save_message("c", &msg).is_err());

        let loaded = repo.load_conversation("c").unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 1);
        assert_eq!(loaded.messages[0].tool_calls.len(), 1);
    }

    #[test]
    fn test_delete_cascades() {
        let repo = SqliteRepository::in_memory().unwrap();
        repo.save_message("c", &Message::assistant("", vec![call("a")])).unwrap();
        repo.save_message("c", &Message::tool("a", "out")).unwrap();

        assert!(repo.delete_conversation("c").unwrap());
        assert!(!repo.delete_conversation("c").unwrap());
        assert!(repo.load_conversation("c").unwrap().is_none());

        let conn = repo.conn();
        let messages: i64 = conn
            .query_row("SELECT COUNT(*) FROM messages", [], |r| r.get(0))
            .unwrap();
        let calls: i64 = conn
            .query_row("SELECT COUNT(*) FROM tool_calls", [], |r| r.get(0))
            .unwrap();
        assert_eq!((messages, calls), (0, 0));
    }

    #[test]
    fn test_list_orders_by_recency() {
        let repo = SqliteRepository::in_memory().unwrap();
        let mut old = Conversation::new("old");
        old.updated_at = Utc::now() - chrono::Duration::hours(2);
        let mut new = Conversation::new("new");
        new.updated_at = Utc::now() - chrono::Duration::hours(1);
        repo.save_conversation(&old).unwrap();
        repo.save_conversation(&new).unwrap();

        assert_eq!(repo.list_conversation_ids().unwrap(), vec!["new", "old"]);

        repo.save_message("old", &Message::user("bump")).unwrap();
        assert_eq!(repo.list_conversation_ids().unwrap(), vec!["old", "new"]);
    }

    #[test]
    fn test_open_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("agent.db");
        {
            let repo = SqliteRepository::open(&path).unwrap();
            repo.save_message("c", &Message::user("persisted")).unwrap();
        }
        let repo = SqliteRepository::open(&path).unwrap();
        let loaded = repo.load_conversation("c").unwrap().unwrap();
        assert_eq!(loaded.messages[0].content, "persisted");
    }
}
