//! Session persistence layer
//!
//! Responsible for storing and loading conversation history.
//! In-memory by default; Postgres when a database URL is configured.

pub mod postgres;

pub use postgres::PgSessionStore;

use crate::models::Message;
use crate::Result;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, RwLock};

/// Trait for session persistence
#[async_trait::async_trait]
pub trait SessionStore: Send + Sync {
    /// Full ordered history; empty for an unknown session
    async fn get(&self, session_id: &str) -> Result<Vec<Message>>;

    async fn append(&self, session_id: &str, message: Message) -> Result<()>;

    /// Append a batch so that readers see all of it or none of it
    async fn append_all(&self, session_id: &str, messages: Vec<Message>) -> Result<()> {
        for message in messages {
            self.append(session_id, message).await?;
        }
        Ok(())
    }
}

/// In-memory session store for development
#[derive(Clone, Default)]
pub struct InMemorySessionStore {
    sessions: Arc<RwLock<HashMap<String, Vec<Message>>>>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}

#[async_trait::async_trait]
impl SessionStore for InMemorySessionStore {
    async fn get(&self, session_id: &str) -> Result<Vec<Message>> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(session_id).cloned().unwrap_or_default())
    }

    async fn append(&self, session_id: &str, message: Message) -> Result<()> {
        self.append_all(session_id, vec![message]).await
    }

    async fn append_all(&self, session_id: &str, messages: Vec<Message>) -> Result<()> {
        let mut sessions = self.sessions.write().await;
        sessions
            .entry(session_id.to_string())
            .or_default()
            .extend(messages);
        Ok(())
    }
}

/// Per-session async mutexes so one turn per session runs at a time
#[derive(Default)]
pub struct SessionLocks {
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for exclusive use of `session_id`. Held until the guard drops.
    pub async fn acquire(&self, session_id: &str) -> OwnedMutexGuard<()> {
        let lock = {
            let mut locks = self.locks.lock().await;
            // entries nobody holds or waits on can go
            locks.retain(|_, lock| Arc::strong_count(lock) > 1);
            locks
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        lock.lock_owned().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_unknown_session_is_empty() {
        let store = InMemorySessionStore::new();
        assert!(store.get("nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_preserves_order() {
        let store = InMemorySessionStore::new();
        store.append("s1", Message::human("one")).await.unwrap();
        store
            .append_all("s1", vec![Message::assistant("two"), Message::human("three")])
            .await
            .unwrap();

        let contents: Vec<String> = store
            .get("s1")
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["one", "two", "three"]);
        assert_eq!(store.session_count().await, 1);
    }

    #[tokio::test]
    async fn test_same_session_serialized() {
        let locks = Arc::new(SessionLocks::new());
        let guard = locks.acquire("s1").await;

        let waiter = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("s1").await;
            })
        };

        // other sessions are not blocked
        let other = tokio::time::timeout(Duration::from_millis(100), locks.acquire("s2")).await;
        assert!(other.is_ok());

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_idle_locks_pruned() {
        let locks = SessionLocks::new();
        drop(locks.acquire("a").await);
        drop(locks.acquire("b").await);
        assert_eq!(locks.locks.lock().await.len(), 1);
    }
}
