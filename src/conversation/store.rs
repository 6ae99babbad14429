//! Conversation Store - in-memory conversation map with an optional durable mirror

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::{info, warn};

use super::history::Conversation;
use super::message::Message;
use super::render::render_messages;
use crate::llm::ChatMessage;
use crate::metrics::PAIRING_REPAIRS;
use crate::persistence::{ConversationRepository, PersistenceError};

/// Listing entry for a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationSummary {
    pub id: String,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Thread-safe map of conversations
///
/// The in-memory state is authoritative. Writes to the repository are
/// best-effort: a failure is logged and the in-memory append stands.
#[derive(Default)]
pub struct ConversationStore {
    conversations: RwLock<HashMap<String, Conversation>>,
    repository: Option<Arc<dyn ConversationRepository>>,
}

impl ConversationStore {
    /// Memory-only store
    pub fn new() -> Self {
        Self::default()
    }

    /// Store mirrored to `repository`
    pub fn with_repository(repository: Arc<dyn ConversationRepository>) -> Self {
        Self {
            conversations: RwLock::new(HashMap::new()),
            repository: Some(repository),
        }
    }

    /// Load every persisted conversation into memory
    ///
    /// Conversations that fail to load are logged and skipped.
    pub async fn load_all(&self) -> Result<usize, PersistenceError> {
        let Some(ids) = self.on_repository(|repo| repo.list_conversation_ids()).await else {
            return Ok(0);
        };

        let mut loaded = 0;
        for id in ids? {
            if let Some(conv) = self.load_from_repository(&id).await {
                self.conversations.write().await.entry(id).or_insert(conv);
                loaded += 1;
            }
        }
        info!(count = loaded, "Loaded conversations from storage");
        Ok(loaded)
    }

    /// Append `message` to the conversation, creating it if absent
    ///
    /// The message is in memory before the repository write starts. Appends
    /// to one conversation must be serialized by the caller to keep storage
    /// in append order.
    pub async fn append(&self, conversation_id: &str, message: Message) {
        let loaded = self.load_if_missing(conversation_id).await;
        let created = {
            let mut conversations = self.conversations.write().await;
            let (conversation, created) = entry(&mut conversations, conversation_id, loaded);
            conversation.push(message.clone());
            created
        };

        if let Some(conv) = created {
            self.persist_conversation(conv).await;
        }

        let id = conversation_id.to_string();
        let message_id = message.id.clone();
        let saved = self
            .on_repository(move |repo| repo.save_message(&id, &message))
            .await;
        if let Some(Err(e)) = saved {
            warn!(
                conversation_id,
                message_id = %message_id,
                error = %e,
                "Failed to persist message"
            );
        }
    }

    /// Render the conversation for the LLM, repairing tool-call pairing
    ///
    /// An unknown conversation renders as an empty sequence.
    pub async fn render(&self, conversation_id: &str) -> Vec<ChatMessage> {
        let conversations = self.conversations.read().await;
        let Some(conversation) = conversations.get(conversation_id) else {
            return Vec::new();
        };

        let rendered = render_messages(&conversation.messages);
        if !rendered.repaired.is_empty() {
            PAIRING_REPAIRS.inc_by(rendered.repaired.len() as f64);
            warn!(
                conversation_id,
                repaired = ?rendered.repaired,
                "Conversation had unanswered tool calls; inserted placeholder results"
            );
        }
        if rendered.dropped > 0 {
            warn!(conversation_id, dropped = rendered.dropped, "Dropped unpaired tool messages");
        }
        rendered.messages
    }

    /// Snapshot of a conversation, loading it from the repository if needed
    pub async fn get(&self, conversation_id: &str) -> Option<Conversation> {
        if let Some(conv) = self.conversations.read().await.get(conversation_id) {
            return Some(conv.clone());
        }

        let loaded = self.load_from_repository(conversation_id).await?;
        let mut conversations = self.conversations.write().await;
        Some(
            conversations
                .entry(conversation_id.to_string())
                .or_insert(loaded)
                .clone(),
        )
    }

    /// Snapshot of a conversation, creating an empty one if it does not exist
    pub async fn get_or_create(&self, conversation_id: &str) -> Conversation {
        let loaded = self.load_if_missing(conversation_id).await;
        let (snapshot, created) = {
            let mut conversations = self.conversations.write().await;
            let (conversation, created) = entry(&mut conversations, conversation_id, loaded);
            (conversation.clone(), created)
        };

        if let Some(conv) = created {
            self.persist_conversation(conv).await;
        }
        snapshot
    }

    /// All conversations, most recently updated first
    pub async fn list(&self) -> Vec<ConversationSummary> {
        let conversations = self.conversations.read().await;
        let mut summaries: Vec<ConversationSummary> = conversations
            .values()
            .map(|c| ConversationSummary {
                id: c.id.clone(),
                message_count: c.len(),
                created_at: c.created_at,
                updated_at: c.updated_at,
            })
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at).then_with(|| a.id.cmp(&b.id)));
        summaries
    }

    /// Remove a conversation from memory and storage
    pub async fn delete(&self, conversation_id: &str) -> bool {
        let removed = self
            .conversations
            .write()
            .await
            .remove(conversation_id)
            .is_some();

        let id = conversation_id.to_string();
        let persisted = match self
            .on_repository(move |repo| repo.delete_conversation(&id))
            .await
        {
            Some(Ok(deleted)) => deleted,
            Some(Err(e)) => {
                warn!(conversation_id, error = %e, "Failed to delete persisted conversation");
                false
            }
            None => false,
        };
        removed || persisted
    }

    /// Run a repository operation on the blocking pool
    ///
    /// Returns `None` for a memory-only store. Never called with the
    /// conversation map locked.
    async fn on_repository<T, F>(&self, op: F) -> Option<Result<T, PersistenceError>>
    where
        T: Send + 'static,
        F: FnOnce(&dyn ConversationRepository) -> Result<T, PersistenceError> + Send + 'static,
    {
        let repo = Arc::clone(self.repository.as_ref()?);
        let result = tokio::task::spawn_blocking(move || op(repo.as_ref()))
            .await
            .unwrap_or_else(|e| Err(PersistenceError::Task(e.to_string())));
        Some(result)
    }

    async fn persist_conversation(&self, conversation: Conversation) {
        let id = conversation.id.clone();
        let saved = self
            .on_repository(move |repo| repo.save_conversation(&conversation))
            .await;
        if let Some(Err(e)) = saved {
            warn!(conversation_id = %id, error = %e, "Failed to persist conversation");
        }
    }

    async fn load_from_repository(&self, conversation_id: &str) -> Option<Conversation> {
        let id = conversation_id.to_string();
        match self
            .on_repository(move |repo| repo.load_conversation(&id))
            .await?
        {
            Ok(conv) => conv,
            Err(e) => {
                warn!(conversation_id, error = %e, "Failed to load conversation");
                None
            }
        }
    }

    /// Stored copy of a conversation that is not in memory yet
    async fn load_if_missing(&self, conversation_id: &str) -> Option<Conversation> {
        if self.repository.is_none()
            || self.conversations.read().await.contains_key(conversation_id)
        {
            return None;
        }
        self.load_from_repository(conversation_id).await
    }
}

/// Existing conversation, the loaded one, or a new one
///
/// The second element is a copy of the conversation if it was just created,
/// so the caller can persist it after releasing the map.
fn entry<'a>(
    conversations: &'a mut HashMap<String, Conversation>,
    conversation_id: &str,
    loaded: Option<Conversation>,
) -> (&'a mut Conversation, Option<Conversation>) {
    let mut created = None;
    let conversation = conversations
        .entry(conversation_id.to_string())
        .or_insert_with(|| {
            loaded.unwrap_or_else(|| {
                let conv = Conversation::new(conversation_id);
                created = Some(conv.clone());
                conv
            })
        });
    (conversation, created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conversation::ToolCallRequest;
    use crate::persistence::SqliteRepository;
    use std::time::{Duration, Instant};

    /// Repository whose message writes are slow or fail
    struct FaultyRepository {
        delay: Duration,
        fail: bool,
    }

    impl FaultyRepository {
        fn outcome(&self) -> Result<(), PersistenceError> {
            std::thread::sleep(self.delay);
            if self.fail {
                Err(PersistenceError::Corrupt("disk full".into()))
            } else {
                Ok(())
            }
        }
    }

    impl ConversationRepository for FaultyRepository {
        fn save_conversation(&self, _conversation: &Conversation) -> Result<(), PersistenceError> {
            self.outcome()
        }

        fn save_message(&self, _conversation_id: &str, _message: &Message) -> Result<(), PersistenceError> {
            self.outcome()
        }

        fn load_conversation(&self, _id: &str) -> Result<Option<Conversation>, PersistenceError> {
            Ok(None)
        }

        fn list_conversation_ids(&self) -> Result<Vec<String>, PersistenceError> {
            Ok(Vec::new())
        }

        fn delete_conversation(&self, _id: &str) -> Result<bool, PersistenceError> {
            self.outcome().map(|_| true)
        }
    }

    #[tokio::test]
    async fn test_append_then_render_preserves_content_and_role() {
        let store = ConversationStore::new();
        store.append("c", Message::user("  exact text\n")).await;

        let rendered = store.render("c").await;
        assert_eq!(rendered.len(), 1);
        assert_eq!(rendered[0].role, "user");
        assert_eq!(rendered[0].content, "  exact text\n");
    }

    #[tokio::test]
    async fn test_render_unknown_conversation_is_empty() {
        assert!(ConversationStore::new().render("missing").await.is_empty());
    }

    #[tokio::test]
    async fn test_render_repairs_missing_response() {
        let store = ConversationStore::new();
        let call = ToolCallRequest {
            id: "a".into(),
            name: "run_command".into(),
            arguments: "{}".into(),
        };
        store.append("c", Message::assistant("", vec![call])).await;

        let rendered = store.render("c").await;
        assert_eq!(rendered.len(), 2);
        assert_eq!(rendered[1].tool_call_id.as_deref(), Some("a"));

        // The log itself is untouched
        assert_eq!(store.get("c").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_get_or_create_and_list() {
        let store = ConversationStore::new();
        assert!(store.get("a").await.is_none());

        let created = store.get_or_create("a").await;
        assert!(created.is_empty());
        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        store.append("b", Message::user("later")).await;

        let ids: Vec<String> = store.list().await.into_iter().map(|s| s.id).collect();
        assert_eq!(ids, vec!["b", "a"]);
    }

    #[tokio::test]
    async fn test_delete() {
        let store = ConversationStore::new();
        store.append("c", Message::user("hi")).await;
        assert!(store.delete("c").await);
        assert!(!store.delete("c").await);
        assert!(store.get("c").await.is_none());
    }


    #[tokio::test]
    async fn test_repository_mirror_and_reload() {
        let repo: Arc<dyn ConversationRepository> = Arc::new(SqliteRepository::in_memory().unwrap());

        let store = ConversationStore::with_repository(repo.clone());
        store.append("c", Message::user("one")).await;
        store.append("c", Message::assistant("two", vec![])).await;

        let reloaded = ConversationStore::with_repository(repo.clone());
        assert_eq!(reloaded.load_all().await.unwrap(), 1);
        let conv = reloaded.get("c").await.unwrap();
        assert_eq!(conv.messages.len(), 2);
        assert_eq!(conv.messages[1].content, "two");

        // Lookup falls back to storage when the conversation was never loaded
        let lazy = ConversationStore::with_repository(repo.clone());
        assert_eq!(lazy.get("c").await.unwrap().messages.len(), 2);

        assert!(lazy.delete("c").await);
        assert!(repo.load_conversation("c").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_write_keeps_in_memory_append() {
        let store = ConversationStore::with_repository(Arc::new(FaultyRepository {
            delay: Duration::ZERO,
            fail: true,
        }));

        store.append("c", Message::user("kept")).await;
        store.append("c", Message::assistant("also kept", vec![])).await;

        let conv = store.get("c").await.unwrap();
        assert_eq!(conv.len(), 2);
        assert_eq!(conv.messages[0].content, "kept");

        let rendered = store.render("c").await;
        assert_eq!(rendered.len(), 2);
        assert_eq!(rendered[1].content, "also kept");

        // Memory removal stands even when storage refuses
        assert!(store.delete("c").await);
        assert!(store.get("c").await.is_none());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_slow_write_does_not_block_other_conversations() {
        let store = Arc::new(ConversationStore::with_repository(Arc::new(FaultyRepository {
            delay: Duration::from_millis(800),
            fail: false,
        })));
        store.get_or_create("b").await;

        let writer = {
            let store = Arc::clone(&store);
            tokio::spawn(async move { store.append("a", Message::user("slow")).await })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;

        let start = Instant::now();
        assert!(store.render("b").await.is_empty());
        // Already in memory while its write is still running
        assert_eq!(store.get("a").await.unwrap().len(), 1);
        let waited = start.elapsed();
        assert!(waited < Duration::from_millis(300), "waited {waited:?}");

        writer.await.unwrap();
    }
}
