use crate::session::ChatSession;
use crate::store::{SessionStore, StoreError};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// The live session shared between the event listeners and the saver.
pub type SharedSession = Arc<Mutex<ChatSession>>;

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Trailing-edge debounced persistence of one live session.
///
/// A scheduled save snapshots the session when it fires, not when it was scheduled, so a
/// burst of chunks ends in one write of the latest content. A save is only called off while
/// it is still waiting; one already writing runs to completion before any later save starts.
pub struct DebouncedSaver {
    store: Arc<dyn SessionStore>,
    session: SharedSession,
    delay: Duration,
    pending: Mutex<Option<PendingSave>>,
}

struct PendingSave {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl DebouncedSaver {
    pub fn new(store: Arc<dyn SessionStore>, session: SharedSession, delay: Duration) -> Self {
        Self {
            store,
            session,
            delay,
            pending: Mutex::new(None),
        }
    }

    /// Schedule a save after the quiet period, replacing any save already scheduled.
    /// Must be called from within a tokio runtime.
    pub fn schedule(&self) {
        let mut pending = lock(&self.pending);
        let previous = pending.take().map(|p| {
            p.cancel.cancel();
            p.task
        });
        let cancel = CancellationToken::new();
        let store = Arc::clone(&self.store);
        let session = Arc::clone(&self.session);
        let delay = self.delay;
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            if let Some(previous) = previous {
                let _ = previous.await;
            }
            tokio::select! {
                biased;
                _ = token.cancelled() => return,
                _ = tokio::time::sleep(delay) => {}
            }
            let snapshot = lock(&session).clone();
            if let Err(e) = store.save(&snapshot).await {
                log::warn!("store: debounced save of {} failed: {}", snapshot.id, e);
            }
        });
        *pending = Some(PendingSave { cancel, task });
    }

    /// Call off a waiting save, let one already writing finish, then write the current state.
    pub async fn flush(&self) -> Result<(), StoreError> {
        let pending = lock(&self.pending).take();
        if let Some(pending) = pending {
            pending.cancel.cancel();
            let _ = pending.task.await;
        }
        let snapshot = lock(&self.session).clone();
        self.store.save(&snapshot).await
    }
}

impl Drop for DebouncedSaver {
    fn drop(&mut self) {
        if let Some(pending) = lock(&self.pending).take() {
            pending.cancel.cancel();
        }
    }
}
