use crate::session::{ChatSession, SessionId};
use crate::store::{sort_recent_first, SessionStore, StoreError};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory store for sessions and favorites. Nothing survives the process.
pub struct MemorySessionStore {
    inner: Arc<RwLock<HashMap<SessionId, ChatSession>>>,
    favorites: Arc<RwLock<Vec<String>>>,
}

impl Default for MemorySessionStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            favorites: Arc::new(RwLock::new(Vec::new())),
        }
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn get(&self, id: &str) -> Result<Option<ChatSession>, StoreError> {
        Ok(self.inner.read().await.get(id).cloned())
    }

    async fn list(&self) -> Result<Vec<ChatSession>, StoreError> {
        let mut sessions: Vec<ChatSession> = self.inner.read().await.values().cloned().collect();
        sort_recent_first(&mut sessions);
        Ok(sessions)
    }

    async fn save(&self, session: &ChatSession) -> Result<(), StoreError> {
        self.inner
            .write()
            .await
            .insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        Ok(self.inner.write().await.remove(id).is_some())
    }

    async fn get_favorites(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.favorites.read().await.clone())
    }

    async fn save_favorites(&self, ids: &[String]) -> Result<(), StoreError> {
        *self.favorites.write().await = ids.to_vec();
        Ok(())
    }
}
