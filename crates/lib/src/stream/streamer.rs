//! Chat emission core: one cancellable generation at a time, replayed as chunk/done events.

use crate::config::Config;
use crate::llm::{CompletionBackend, GatewayError, HistoryEntry};
use crate::stream::chunker::{synthesize_chunks, ChunkKind};
use crate::stream::retry::RetryPolicy;
use std::cell::Cell;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Event delivered to listeners while a reply is replayed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// One fragment of the reply, in emission order.
    Chunk { content: String, kind: ChunkKind },
    /// The reply finished; `text` is exactly what the gateway returned.
    Done { text: String },
}

impl StreamEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            StreamEvent::Chunk { .. } => EventKind::Chunk,
            StreamEvent::Done { .. } => EventKind::Done,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Chunk,
    Done,
}

/// Handle returned by [`ChatStreamer::on`], for removing a single listener.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&StreamEvent) + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("invalid history: {0}")]
    InvalidHistory(String),
    #[error(transparent)]
    Gateway(#[from] GatewayError),
    /// The generation was cancelled or superseded by a newer one.
    #[error("generation cancelled")]
    Cancelled,
}

impl StreamError {
    pub fn is_cancelled(&self) -> bool {
        matches!(self, StreamError::Cancelled)
    }

    pub fn is_content_error(&self) -> bool {
        matches!(self, StreamError::Gateway(e) if e.is_content_error())
    }

    pub fn is_configuration_error(&self) -> bool {
        matches!(self, StreamError::Gateway(e) if e.is_configuration_error())
    }
}

/// Pacing of the replay: batch size for plain words and the pause between chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub threshold: usize,
    pub delay: Duration,
}

impl Default for Pacing {
    fn default() -> Self {
        Self {
            threshold: 20,
            delay: Duration::from_millis(15),
        }
    }
}

/// Lives from send until the call resolves, fails, or is cancelled.
struct GenerationRequest {
    id: Uuid,
    snapshot: Vec<HistoryEntry>,
    cancel: CancellationToken,
    // Sees every event of this request and nothing from any other.
    scoped: Option<Listener>,
}

struct ActiveRequest {
    id: Uuid,
    cancel: CancellationToken,
}

thread_local! {
    // Address of the streamer whose listeners are running on this thread; 0 when none.
    static DISPATCHING: Cell<usize> = const { Cell::new(0) };
}

/// Marks this thread as dispatching for one streamer until dropped, including on unwind.
struct DispatchGuard {
    previous: usize,
}

impl DispatchGuard {
    fn enter(owner: usize) -> Self {
        Self {
            previous: DISPATCHING.with(|d| d.replace(owner)),
        }
    }
}

impl Drop for DispatchGuard {
    fn drop(&mut self) {
        DISPATCHING.with(|d| d.set(self.previous));
    }
}

/// Turns one finished completion into an observable, cancellable, ordered event stream.
///
/// Construct once and share by `Arc`. Starting a generation cancels the previous one before
/// its network call is issued.
pub struct ChatStreamer {
    backend: Arc<dyn CompletionBackend>,
    system_prompt: String,
    pacing: Pacing,
    retry: RetryPolicy,
    current: Mutex<Option<ActiveRequest>>,
    // Held while checking cancellation and running listeners for one event.
    emit_gate: Mutex<()>,
    listeners: Mutex<Vec<(ListenerId, EventKind, Listener)>>,
    next_listener: Mutex<u64>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl ChatStreamer {
    pub fn new(backend: Arc<dyn CompletionBackend>) -> Self {
        Self {
            backend,
            system_prompt: String::new(),
            pacing: Pacing::default(),
            retry: RetryPolicy::default(),
            current: Mutex::new(None),
            emit_gate: Mutex::new(()),
            listeners: Mutex::new(Vec::new()),
            next_listener: Mutex::new(0),
        }
    }

    /// System prompt, pacing, and retry settings from config.
    pub fn from_config(config: &Config, backend: Arc<dyn CompletionBackend>) -> Self {
        Self::new(backend)
            .with_system_prompt(config.gateway.system_prompt.clone())
            .with_pacing(Pacing {
                threshold: config.streaming.chunk_threshold,
                delay: config.streaming.chunk_delay(),
            })
            .with_retry(RetryPolicy::from_config(&config.retry))
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = prompt.into();
        self
    }

    pub fn with_pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Register a listener for one event kind.
    ///
    /// Listeners run synchronously on the emitting task, in registration order.
    pub fn on<F>(&self, kind: EventKind, listener: F) -> ListenerId
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        let id = {
            let mut next = lock(&self.next_listener);
            *next += 1;
            ListenerId(*next)
        };
        lock(&self.listeners).push((id, kind, Arc::new(listener)));
        id
    }

    pub fn on_chunk<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on(EventKind::Chunk, move |event| {
            if let StreamEvent::Chunk { content, .. } = event {
                listener(content);
            }
        })
    }

    pub fn on_done<F>(&self, listener: F) -> ListenerId
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        self.on(EventKind::Done, move |event| {
            if let StreamEvent::Done { text } = event {
                listener(text);
            }
        })
    }

    /// Returns false when the listener was already gone.
    pub fn remove_listener(&self, id: ListenerId) -> bool {
        let mut listeners = lock(&self.listeners);
        let before = listeners.len();
        listeners.retain(|(lid, _, _)| *lid != id);
        listeners.len() != before
    }

    pub fn remove_all_listeners(&self) {
        lock(&self.listeners).clear();
    }

    pub fn listener_count(&self) -> usize {
        lock(&self.listeners).len()
    }

    /// True while a generation is outstanding.
    pub fn is_streaming(&self) -> bool {
        lock(&self.current).is_some()
    }

    /// Send `history` (system prompt prepended), replay the reply as chunk events followed by
    /// one done event, and return the full reply text.
    pub async fn send_message(&self, history: &[HistoryEntry]) -> Result<String, StreamError> {
        self.send(history, None).await
    }

    /// Like [`send_message`](Self::send_message), with a listener bound to this one request.
    ///
    /// `listener` receives this request's chunk and done events, ahead of the registered
    /// listeners, and never sees events of a request that supersedes it.
    pub async fn send_message_with<F>(
        &self,
        history: &[HistoryEntry],
        listener: F,
    ) -> Result<String, StreamError>
    where
        F: Fn(&StreamEvent) + Send + Sync + 'static,
    {
        self.send(history, Some(Arc::new(listener))).await
    }

    async fn send(
        &self,
        history: &[HistoryEntry],
        scoped: Option<Listener>,
    ) -> Result<String, StreamError> {
        validate_history(history)?;
        let mut snapshot = Vec::with_capacity(history.len() + 1);
        if !self.system_prompt.trim().is_empty() {
            snapshot.push(HistoryEntry::system(self.system_prompt.clone()));
        }
        snapshot.extend_from_slice(history);

        let request = self.begin_request(snapshot, scoped);
        log::info!(
            "stream: request {} started ({} messages)",
            request.id,
            request.snapshot.len()
        );
        let result = self.run(&request).await;
        self.finish_request(request.id);
        match &result {
            Ok(text) => log::info!("stream: request {} done ({} bytes)", request.id, text.len()),
            Err(StreamError::Cancelled) => log::info!("stream: request {} cancelled", request.id),
            Err(e) => log::warn!("stream: request {} failed: {}", request.id, e),
        }
        result
    }

    /// Abort the outstanding generation, if any. No chunk or done event of that generation is
    /// delivered after this returns. Calling it with nothing outstanding is a no-op.
    pub fn cancel_current_stream(&self) {
        let active = lock(&self.current).take();
        if let Some(active) = active {
            log::debug!("stream: cancelling request {}", active.id);
            self.cancel_and_wait(&active.cancel);
        }
    }

    fn begin_request(
        &self,
        snapshot: Vec<HistoryEntry>,
        scoped: Option<Listener>,
    ) -> GenerationRequest {
        let cancel = CancellationToken::new();
        let id = Uuid::new_v4();
        let previous = lock(&self.current).replace(ActiveRequest {
            id,
            cancel: cancel.clone(),
        });
        if let Some(previous) = previous {
            log::debug!("stream: request {} superseded by {}", previous.id, id);
            self.cancel_and_wait(&previous.cancel);
        }
        GenerationRequest {
            id,
            snapshot,
            cancel,
            scoped,
        }
    }

    fn finish_request(&self, id: Uuid) {
        let mut current = lock(&self.current);
        if current.as_ref().is_some_and(|a| a.id == id) {
            *current = None;
        }
    }

    /// Cancel, then wait out any dispatch in flight on another task. From inside a listener the
    /// gate is already ours; the cancelled token stops the loop at its next check.
    fn cancel_and_wait(&self, token: &CancellationToken) {
        token.cancel();
        if DISPATCHING.with(Cell::get) != self.address() {
            drop(lock(&self.emit_gate));
        }
    }

    fn address(&self) -> usize {
        self as *const Self as usize
    }

    async fn run(&self, request: &GenerationRequest) -> Result<String, StreamError> {
        let text = self.complete_with_retry(request).await?;
        self.replay(request, &text).await?;
        Ok(text)
    }

    async fn complete_with_retry(&self, request: &GenerationRequest) -> Result<String, StreamError> {
        let mut attempt: u32 = 1;
        loop {
            if request.cancel.is_cancelled() {
                return Err(StreamError::Cancelled);
            }
            let outcome = tokio::select! {
                biased;
                _ = request.cancel.cancelled() => return Err(StreamError::Cancelled),
                res = self.backend.complete(&request.snapshot) => res,
            };
            match outcome {
                Ok(text) => return Ok(text),
                Err(e) if self.retry.should_retry(&e, attempt) => {
                    let delay = self.retry.delay_for(attempt);
                    log::warn!(
                        "stream: attempt {}/{} failed ({}), retrying in {:?}",
                        attempt,
                        self.retry.max_attempts,
                        e,
                        delay
                    );
                    tokio::select! {
                        biased;
                        _ = request.cancel.cancelled() => return Err(StreamError::Cancelled),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    attempt += 1;
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    async fn replay(&self, request: &GenerationRequest, text: &str) -> Result<(), StreamError> {
        for chunk in synthesize_chunks(text, self.pacing.threshold) {
            self.dispatch(
                request,
                StreamEvent::Chunk {
                    content: chunk.content,
                    kind: chunk.kind,
                },
            )?;
            self.pause(request).await?;
        }
        self.dispatch(
            request,
            StreamEvent::Done {
                text: text.to_string(),
            },
        )
    }

    async fn pause(&self, request: &GenerationRequest) -> Result<(), StreamError> {
        if self.pacing.delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::select! {
                biased;
                _ = request.cancel.cancelled() => return Err(StreamError::Cancelled),
                _ = tokio::time::sleep(self.pacing.delay) => {}
            }
        }
        Ok(())
    }

    fn dispatch(&self, request: &GenerationRequest, event: StreamEvent) -> Result<(), StreamError> {
        let _gate = lock(&self.emit_gate);
        if request.cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        let kind = event.kind();
        let listeners: Vec<Listener> = request
            .scoped
            .iter()
            .cloned()
            .chain(
                lock(&self.listeners)
                    .iter()
                    .filter(|(_, k, _)| *k == kind)
                    .map(|(_, _, l)| Arc::clone(l)),
            )
            .collect();
        let _dispatching = DispatchGuard::enter(self.address());
        for listener in &listeners {
            if request.cancel.is_cancelled() {
                break;
            }
            listener(&event);
        }
        if request.cancel.is_cancelled() {
            return Err(StreamError::Cancelled);
        }
        Ok(())
    }
}

fn validate_history(history: &[HistoryEntry]) -> Result<(), StreamError> {
    if history.is_empty() {
        return Err(StreamError::InvalidHistory("history is empty".to_string()));
    }
    if let Some(i) = history.iter().position(|e| e.content.trim().is_empty()) {
        return Err(StreamError::InvalidHistory(format!(
            "entry {} has empty content",
            i
        )));
    }
    Ok(())
}
