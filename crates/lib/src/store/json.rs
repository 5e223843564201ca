//! JSON-file store: one `<id>.session.json` per session and a `favorites.json` list,
//! all under one directory. Writes go through a temp file and a rename.

use crate::session::ChatSession;
use crate::store::{sort_recent_first, SessionStore, StoreError};
use async_trait::async_trait;
use std::path::{Path, PathBuf};

const SESSION_SUFFIX: &str = ".session.json";
const FAVORITES_FILE: &str = "favorites.json";

pub struct JsonSessionStore {
    dir: PathBuf,
}

impl JsonSessionStore {
    /// The directory is created on first write.
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn session_path(&self, id: &str) -> Result<PathBuf, StoreError> {
        let valid = !id.is_empty()
            && id
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
        if !valid {
            return Err(StoreError::InvalidId(id.to_string()));
        }
        Ok(self.dir.join(format!("{}{}", id, SESSION_SUFFIX)))
    }

    async fn write_atomic(&self, path: &Path, data: Vec<u8>) -> Result<(), StoreError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        // Unique per write, so two writers never share a temp file.
        let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
        tmp_name.push(format!(".{}.tmp", uuid::Uuid::new_v4().simple()));
        let tmp = path.with_file_name(tmp_name);
        let written = match tokio::fs::write(&tmp, data).await {
            Ok(()) => tokio::fs::rename(&tmp, path).await,
            Err(e) => Err(e),
        };
        if written.is_err() {
            let _ = tokio::fs::remove_file(&tmp).await;
        }
        written.map_err(StoreError::from)
    }
}

async fn read_optional(path: &Path) -> Result<Option<String>, StoreError> {
    match tokio::fs::read_to_string(path).await {
        Ok(s) => Ok(Some(s)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

#[async_trait]
impl SessionStore for JsonSessionStore {
    async fn get(&self, id: &str) -> Result<Option<ChatSession>, StoreError> {
        let path = self.session_path(id)?;
        match read_optional(&path).await? {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<ChatSession>, StoreError> {
        let mut entries = match tokio::fs::read_dir(&self.dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut sessions = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let name = entry.file_name();
            if !name.to_string_lossy().ends_with(SESSION_SUFFIX) {
                continue;
            }
            let s = tokio::fs::read_to_string(entry.path()).await?;
            match serde_json::from_str::<ChatSession>(&s) {
                Ok(session) => sessions.push(session),
                Err(e) => log::warn!("store: skipping unreadable {}: {}", entry.path().display(), e),
            }
        }
        sort_recent_first(&mut sessions);
        Ok(sessions)
    }

    async fn save(&self, session: &ChatSession) -> Result<(), StoreError> {
        let path = self.session_path(&session.id)?;
        let data = serde_json::to_vec_pretty(session)?;
        self.write_atomic(&path, data).await?;
        log::debug!("store: saved session {} ({} messages)", session.id, session.messages.len());
        Ok(())
    }

    async fn delete(&self, id: &str) -> Result<bool, StoreError> {
        let path = self.session_path(id)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn get_favorites(&self) -> Result<Vec<String>, StoreError> {
        match read_optional(&self.dir.join(FAVORITES_FILE)).await? {
            Some(s) => Ok(serde_json::from_str(&s)?),
            None => Ok(Vec::new()),
        }
    }

    async fn save_favorites(&self, ids: &[String]) -> Result<(), StoreError> {
        let data = serde_json::to_vec_pretty(ids)?;
        self.write_atomic(&self.dir.join(FAVORITES_FILE), data).await
    }
}
