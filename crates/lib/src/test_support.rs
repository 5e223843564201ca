//! Scripted completion backend shared by the unit tests.

use crate::llm::{CompletionBackend, GatewayError, HistoryEntry};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub(crate) fn status(code: u16) -> GatewayError {
    GatewayError::Status {
        status: code,
        body: format!("status {}", code),
    }
}

/// Answers from a queue of scripted outcomes, then from `fallback` once the queue is empty.
pub(crate) struct ScriptedBackend {
    script: Mutex<VecDeque<Result<String, GatewayError>>>,
    fallback: Option<String>,
    requests: Mutex<Vec<Vec<HistoryEntry>>>,
    calls: AtomicUsize,
    // 1-based call number that never resolves; 0 = none.
    hang_on: AtomicUsize,
}

impl ScriptedBackend {
    pub(crate) fn new(script: Vec<Result<String, GatewayError>>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into()),
            fallback: None,
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            hang_on: AtomicUsize::new(0),
        })
    }

    /// Replies with `text` to every call.
    pub(crate) fn replying(text: &str) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            fallback: Some(text.to_string()),
            requests: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
            hang_on: AtomicUsize::new(0),
        })
    }

    pub(crate) fn hang_on_call(self: Arc<Self>, call: usize) -> Arc<Self> {
        self.hang_on.store(call, Ordering::SeqCst);
        self
    }

    pub(crate) fn push(&self, outcome: Result<String, GatewayError>) {
        self.script.lock().unwrap().push_back(outcome);
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub(crate) fn requests(&self) -> Vec<Vec<HistoryEntry>> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) async fn wait_for_calls(&self, n: usize) {
        for _ in 0..500 {
            if self.calls() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("backend saw {} calls, expected {}", self.calls(), n);
    }
}

#[async_trait]
impl CompletionBackend for ScriptedBackend {
    async fn complete(&self, messages: &[HistoryEntry]) -> Result<String, GatewayError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.requests.lock().unwrap().push(messages.to_vec());
        if self.hang_on.load(Ordering::SeqCst) == call {
            std::future::pending::<()>().await;
        }
        let next = self.script.lock().unwrap().pop_front();
        match next {
            Some(outcome) => outcome,
            None => self
                .fallback
                .clone()
                .ok_or_else(|| GatewayError::Content("script exhausted".to_string())),
        }
    }
}
