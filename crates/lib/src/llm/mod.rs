//! Completion gateway: wire types, error taxonomy, and the HTTP client.
//!
//! The gateway is a hosted OpenAI-style chat completions endpoint called once per turn
//! with `stream: false`; the full reply text is extracted from whichever known response
//! shape the provider returned.

mod extract;
mod gateway;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use extract::{extract_content, ResponseShape};
pub use gateway::CompletionClient;

/// Speaker of a conversation entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

/// One `{role, content}` pair as sent to the gateway.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub role: Role,
    pub content: String,
}

impl HistoryEntry {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    /// No credential configured; raised before any network call.
    #[error("gateway api key not configured (set gateway.apiKey or POCKET_API_KEY)")]
    MissingApiKey,
    #[error("gateway request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("gateway api error: {status} {body}")]
    Status { status: u16, body: String },
    /// The gateway answered but nothing usable could be extracted.
    #[error("gateway returned no usable content: {0}")]
    Content(String),
}

impl GatewayError {
    /// Rate limiting, gateway timeouts, and other 5xx are transient; so are connect and timeout
    /// failures that never produced a status.
    pub fn is_retryable(&self) -> bool {
        match self {
            GatewayError::Status { status, .. } => *status == 429 || (500..600).contains(status),
            GatewayError::Request(e) => e.is_connect() || e.is_timeout(),
            GatewayError::MissingApiKey | GatewayError::Content(_) => false,
        }
    }

    /// HTTP status, when the gateway answered with one.
    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::Status { status, .. } => Some(*status),
            GatewayError::Request(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }

    pub fn is_content_error(&self) -> bool {
        matches!(self, GatewayError::Content(_))
    }

    pub fn is_configuration_error(&self) -> bool {
        matches!(self, GatewayError::MissingApiKey)
    }
}

/// A backend that turns a conversation into one finished completion text.
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    /// Issue one completion request. Dropping the returned future aborts the request.
    async fn complete(&self, messages: &[HistoryEntry]) -> Result<String, GatewayError>;
}
