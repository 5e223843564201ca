//! Linear-backoff retry policy for the completion call.

use crate::config::RetryConfig;
use crate::llm::GatewayError;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(config.max_attempts, Duration::from_millis(config.base_delay_ms))
    }

    /// Wait after failed attempt `attempt` (1-based) before the next one.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    /// Whether failed attempt `attempt` (1-based) should be followed by another.
    pub fn should_retry(&self, err: &GatewayError, attempt: u32) -> bool {
        attempt < self.max_attempts && err.is_retryable()
    }
}
