//! Session persistence: the store contract, an in-memory store, a JSON-file store, and the
//! debounced saver used while a reply is streaming.

mod debounce;
mod json;
mod memory;

use crate::session::ChatSession;
use async_trait::async_trait;

pub use debounce::{DebouncedSaver, SharedSession};
pub use json::JsonSessionStore;
pub use memory::MemorySessionStore;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("store data error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("invalid session id: {0}")]
    InvalidId(String),
}

/// Key-value persistence of sessions and the favorites list.
#[async_trait]
pub trait SessionStore: Send + Sync {
    async fn get(&self, id: &str) -> Result<Option<ChatSession>, StoreError>;

    /// All sessions, most recently modified first.
    async fn list(&self) -> Result<Vec<ChatSession>, StoreError>;

    /// Insert or replace by id.
    async fn save(&self, session: &ChatSession) -> Result<(), StoreError>;

    /// Returns false when there was nothing to delete.
    async fn delete(&self, id: &str) -> Result<bool, StoreError>;

    async fn get_favorites(&self) -> Result<Vec<String>, StoreError>;

    async fn save_favorites(&self, ids: &[String]) -> Result<(), StoreError>;
}

/// Add `id` to favorites if absent, remove it otherwise. Returns whether it is now a favorite.
pub async fn toggle_favorite(store: &dyn SessionStore, id: &str) -> Result<bool, StoreError> {
    let mut favorites = store.get_favorites().await?;
    let now_favorite = if let Some(pos) = favorites.iter().position(|f| f == id) {
        favorites.remove(pos);
        false
    } else {
        favorites.push(id.to_string());
        true
    };
    store.save_favorites(&favorites).await?;
    Ok(now_favorite)
}

/// Delete a session and drop it from favorites.
pub async fn delete_session(store: &dyn SessionStore, id: &str) -> Result<bool, StoreError> {
    let deleted = store.delete(id).await?;
    let mut favorites = store.get_favorites().await?;
    let before = favorites.len();
    favorites.retain(|f| f != id);
    if favorites.len() != before {
        store.save_favorites(&favorites).await?;
    }
    Ok(deleted)
}

fn sort_recent_first(sessions: &mut [ChatSession]) {
    sessions.sort_by(|a, b| b.last_modified.cmp(&a.last_modified));
}
