//! Conversation Memory
//!
//! Keyed persistence of a thread's message sequence across independent
//! loop executions. Backends implement [`ConversationStore`];
//! [`ConversationMemory`] adds per-thread serialization and the stateless
//! degraded mode used when no store is configured or the store is down.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AgentError, Result};
use crate::message::{Message, Role};

/// Opaque conversation identifier
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ThreadId(String);

impl ThreadId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn from_string(s: impl Into<String>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ThreadId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for ThreadId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Listing entry for a stored thread
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub id: ThreadId,
    pub title: String,
    pub message_count: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Title from the first line of the opening user message
pub fn thread_title(first_message: &str) -> String {
    let first_line = first_message.lines().next().unwrap_or("").trim();
    if first_line.chars().count() > 50 {
        let preview: String = first_line.chars().take(50).collect();
        format!("{}...", preview)
    } else {
        first_line.to_string()
    }
}

/// Title for a batch of messages opening a thread
pub fn title_for(messages: &[Message]) -> String {
    messages
        .iter()
        .find(|m| m.role == Role::User)
        .map(|m| thread_title(m.text()))
        .unwrap_or_else(|| "New conversation".into())
}

/// Persistence backend for thread histories.
///
/// Append-only: the core never rewrites or deletes stored messages.
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Load a thread's messages, `None` if the thread is unknown
    async fn load(&self, thread: &ThreadId) -> Result<Option<Vec<Message>>>;

    /// Append messages, creating the thread on first use
    async fn append(&self, thread: &ThreadId, messages: &[Message]) -> Result<()>;

    /// Most recently updated threads first
    async fn list(&self, limit: usize) -> Result<Vec<ThreadSummary>>;
}

struct ThreadRecord {
    title: String,
    messages: Vec<Message>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// In-memory store (for development/testing)
pub struct MemoryStore {
    threads: RwLock<HashMap<ThreadId, ThreadRecord>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            threads: RwLock::new(HashMap::new()),
        }
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn load(&self, thread: &ThreadId) -> Result<Option<Vec<Message>>> {
        let threads = self.threads.read().unwrap_or_else(|e| e.into_inner());
        Ok(threads.get(thread).map(|r| r.messages.clone()))
    }

    async fn append(&self, thread: &ThreadId, messages: &[Message]) -> Result<()> {
        let mut threads = self.threads.write().unwrap_or_else(|e| e.into_inner());
        let now = Utc::now();
        let record = threads.entry(thread.clone()).or_insert_with(|| ThreadRecord {
            title: title_for(messages),
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        });
        record.messages.extend_from_slice(messages);
        record.updated_at = now;
        Ok(())
    }

    async fn list(&self, limit: usize) -> Result<Vec<ThreadSummary>> {
        let threads = self.threads.read().unwrap_or_else(|e| e.into_inner());
        let mut result: Vec<_> = threads
            .iter()
            .map(|(id, r)| ThreadSummary {
                id: id.clone(),
                title: r.title.clone(),
                message_count: r.messages.len(),
                created_at: r.created_at,
                updated_at: r.updated_at,
            })
            .collect();

        result.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        result.truncate(limit);
        Ok(result)
    }
}

/// Outcome of loading a thread for one execution
#[derive(Debug)]
pub enum Loaded {
    /// Stored history exists
    History(Vec<Message>),
    /// Thread has no prior state
    Fresh,
    /// Store is absent or unreachable; run single-turn without persisting
    Stateless,
}

/// Thread-serialized access to a [`ConversationStore`]
pub struct ConversationMemory {
    store: Option<Arc<dyn ConversationStore>>,
    degrade_on_failure: bool,
    locks: Mutex<HashMap<ThreadId, Arc<tokio::sync::Mutex<()>>>>,
}

impl ConversationMemory {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self {
            store: Some(store),
            degrade_on_failure: true,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// No backing store: every execution is a single-turn loop
    pub fn stateless() -> Self {
        Self {
            store: None,
            degrade_on_failure: true,
            locks: Mutex::new(HashMap::new()),
        }
    }

    /// Whether store failures degrade to stateless instead of failing
    pub fn degrade_on_failure(mut self, degrade: bool) -> Self {
        self.degrade_on_failure = degrade;
        self
    }

    /// Exclusive access to a thread for one execution
    pub async fn lock(&self, thread: &ThreadId) -> tokio::sync::OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
            locks.retain(|id, l| id == thread || Arc::strong_count(l) > 1);
            Arc::clone(locks.entry(thread.clone()).or_default())
        };
        lock.lock_owned().await
    }

    /// Load a thread's state
    pub async fn load(&self, thread: &ThreadId) -> Result<Loaded> {
        let Some(store) = &self.store else {
            return Ok(Loaded::Stateless);
        };

        match store.load(thread).await {
            Ok(Some(history)) if !history.is_empty() => Ok(Loaded::History(history)),
            Ok(_) => Ok(Loaded::Fresh),
            Err(e) if self.degrade_on_failure => {
                tracing::warn!(thread_id = %thread, error = %e, "Conversation store unavailable, continuing stateless");
                Ok(Loaded::Stateless)
            }
            Err(e) => Err(AgentError::StoreUnavailable(e.to_string())),
        }
    }

    /// Append a complete message set.
    ///
    /// Returns `false` when the store is absent or a failure was degraded.
    pub async fn append(&self, thread: &ThreadId, messages: &[Message]) -> Result<bool> {
        let Some(store) = &self.store else {
            return Ok(false);
        };
        if messages.is_empty() {
            return Ok(true);
        }

        match store.append(thread, messages).await {
            Ok(()) => Ok(true),
            Err(e) if self.degrade_on_failure => {
                tracing::warn!(thread_id = %thread, error = %e, "Failed to persist messages, continuing stateless");
                Ok(false)
            }
            Err(e) => Err(AgentError::StoreUnavailable(e.to_string())),
        }
    }

    /// Recent threads, empty when stateless
    pub async fn list(&self, limit: usize) -> Result<Vec<ThreadSummary>> {
        match &self.store {
            Some(store) => store.list(limit).await,
            None => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct DownStore;

    #[async_trait]
    impl ConversationStore for DownStore {
        async fn load(&self, _thread: &ThreadId) -> Result<Option<Vec<Message>>> {
            Err(AgentError::Other("connection refused".into()))
        }

        async fn append(&self, _thread: &ThreadId, _messages: &[Message]) -> Result<()> {
            Err(AgentError::Other("connection refused".into()))
        }

        async fn list(&self, _limit: usize) -> Result<Vec<ThreadSummary>> {
            Ok(vec![])
        }
    }

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryStore::new();
        let id = ThreadId::new();

        assert!(store.load(&id).await.unwrap().is_none());
        store.append(&id, &[Message::user("Hello there\nsecond line")]).await.unwrap();
        store.append(&id, &[Message::assistant("Hi!")]).await.unwrap();

        let loaded = store.load(&id).await.unwrap().unwrap();
        assert_eq!(loaded.len(), 2);

        let listed = store.list(10).await.unwrap();
        assert_eq!(listed[0].title, "Hello there");
        assert_eq!(listed[0].message_count, 2);
    }

    #[test]
    fn test_thread_title_truncation() {
        let long = "x".repeat(80);
        assert_eq!(thread_title(&long), format!("{}...", "x".repeat(50)));
        assert_eq!(thread_title("short"), "short");
    }

    #[tokio::test]
    async fn test_stateless_memory() {
        let memory = ConversationMemory::stateless();
        let id = ThreadId::new();
        assert!(matches!(memory.load(&id).await.unwrap(), Loaded::Stateless));
        assert!(!memory.append(&id, &[Message::user("hi")]).await.unwrap());
    }

    #[tokio::test]
    async fn test_store_failure_degrades_or_fails() {
        let id = ThreadId::new();

        let degrading = ConversationMemory::new(Arc::new(DownStore));
        assert!(matches!(degrading.load(&id).await.unwrap(), Loaded::Stateless));
        assert!(!degrading.append(&id, &[Message::user("hi")]).await.unwrap());

        let strict = ConversationMemory::new(Arc::new(DownStore)).degrade_on_failure(false);
        assert!(matches!(strict.load(&id).await, Err(AgentError::StoreUnavailable(_))));
    }

    #[tokio::test]
    async fn test_thread_lock_serializes_same_thread() {
        let memory = Arc::new(ConversationMemory::new(Arc::new(MemoryStore::new())));
        let id = ThreadId::from_string("t-1");

        let guard = memory.lock(&id).await;
        let contender = {
            let memory = Arc::clone(&memory);
            let id = id.clone();
            tokio::spawn(async move {
                let _guard = memory.lock(&id).await;
            })
        };

        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!contender.is_finished());

        // Other threads are independent
        let _other = memory.lock(&ThreadId::from_string("t-2")).await;

        drop(guard);
        contender.await.unwrap();
    }
}
