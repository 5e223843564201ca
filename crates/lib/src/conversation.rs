//! Conversation controller: drives one session through the emission core and persists it.
//!
//! Only events of this session's own request reach the live session. Chunks schedule a
//! debounced save; once the turn ends the session is saved and the save is awaited before the
//! turn is reported complete.

use crate::llm::HistoryEntry;
use crate::session::{ChatSession, SessionError};
use crate::store::{self, DebouncedSaver, SessionStore, SharedSession, StoreError};
use crate::stream::{ChatStreamer, EventKind, StreamError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

#[derive(Debug, thiserror::Error)]
pub enum ConversationError {
    #[error(transparent)]
    Stream(#[from] StreamError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("session not found: {0}")]
    NotFound(String),
}

impl ConversationError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ConversationError::Stream(e) if e.is_cancelled())
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

pub struct Conversation {
    streamer: Arc<ChatStreamer>,
    store: Arc<dyn SessionStore>,
    session: SharedSession,
    saver: Arc<DebouncedSaver>,
}

impl Conversation {
    /// Start a fresh session. Nothing is persisted until the first message is sent.
    pub fn new(
        streamer: Arc<ChatStreamer>,
        store: Arc<dyn SessionStore>,
        save_debounce: Duration,
    ) -> Self {
        Self::with_session(streamer, store, ChatSession::new(), save_debounce)
    }

    /// Continue a stored session.
    pub async fn resume(
        streamer: Arc<ChatStreamer>,
        store: Arc<dyn SessionStore>,
        id: &str,
        save_debounce: Duration,
    ) -> Result<Self, ConversationError> {
        let mut session = store
            .get(id)
            .await?
            .ok_or_else(|| ConversationError::NotFound(id.to_string()))?;
        session.recover();
        Ok(Self::with_session(streamer, store, session, save_debounce))
    }

    fn with_session(
        streamer: Arc<ChatStreamer>,
        store: Arc<dyn SessionStore>,
        session: ChatSession,
        save_debounce: Duration,
    ) -> Self {
        let session: SharedSession = Arc::new(Mutex::new(session));
        let saver = Arc::new(DebouncedSaver::new(
            Arc::clone(&store),
            Arc::clone(&session),
            save_debounce,
        ));
        Self {
            streamer,
            store,
            session,
            saver,
        }
    }

    pub fn id(&self) -> String {
        lock(&self.session).id.clone()
    }

    /// Snapshot of the live session.
    pub fn session(&self) -> ChatSession {
        lock(&self.session).clone()
    }

    /// Send a user message and stream the assistant reply into the session.
    pub async fn send(&self, text: &str) -> Result<String, ConversationError> {
        lock(&self.session).push_user(text)?;
        self.run_turn().await
    }

    /// Edit an earlier user message, drop everything after it, and generate a new reply.
    pub async fn regenerate_from(
        &self,
        message_id: &str,
        content: &str,
    ) -> Result<String, ConversationError> {
        lock(&self.session).rewrite_from(message_id, content)?;
        self.run_turn().await
    }

    /// Stop the reply being generated; the partial text is kept.
    pub fn cancel(&self) {
        self.streamer.cancel_current_stream();
    }

    /// Flip this session's favorite flag. Returns whether it is now a favorite.
    pub async fn toggle_favorite(&self) -> Result<bool, ConversationError> {
        Ok(store::toggle_favorite(self.store.as_ref(), &self.id()).await?)
    }

    async fn run_turn(&self) -> Result<String, ConversationError> {
        let history: Vec<HistoryEntry> = lock(&self.session).history();
        self.saver.flush().await?;
        lock(&self.session).begin_reply()?;

        let session = Arc::clone(&self.session);
        let saver = Arc::clone(&self.saver);
        let outcome = self
            .streamer
            .send_message_with(&history, move |event| {
                lock(&session).apply(event);
                if event.kind() == EventKind::Chunk {
                    saver.schedule();
                }
            })
            .await;

        match outcome {
            Ok(text) => {
                lock(&self.session).finish_reply(&text);
                self.saver.flush().await?;
                Ok(text)
            }
            Err(e) => {
                {
                    let mut session = lock(&self.session);
                    if e.is_cancelled() {
                        session.freeze_reply();
                    } else {
                        session.discard_reply();
                    }
                }
                if let Err(save_err) = self.saver.flush().await {
                    log::warn!("conversation: saving after failed turn: {}", save_err);
                }
                Err(e.into())
            }
        }
    }
}
