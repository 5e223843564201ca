//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.pocket/config.json`) and environment.
//! Every section has defaults so an empty `{}` file is a valid config.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Completion gateway endpoint, model, and credentials.
    #[serde(default)]
    pub gateway: GatewayConfig,

    /// Pacing of the synthesized reply stream.
    #[serde(default)]
    pub streaming: StreamingConfig,

    /// Retry policy for transient gateway failures.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Where sessions and favorites are persisted.
    #[serde(default)]
    pub storage: StorageConfig,
}

/// Hosted completion endpoint settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayConfig {
    /// API root; `/chat/completions` is appended (default https://openrouter.ai/api/v1).
    #[serde(default = "default_base_url")]
    pub base_url: String,

    #[serde(default = "default_model")]
    pub model: String,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Bearer token for the gateway. Overridden by POCKET_API_KEY env.
    pub api_key: Option<String>,

    /// Sent as `X-Title` so the provider can attribute traffic.
    #[serde(default = "default_app_name")]
    pub app_name: String,

    /// Sent as `HTTP-Referer`.
    #[serde(default = "default_app_url")]
    pub app_url: String,

    /// Instruction prepended to every conversation as a system message.
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    /// Whole-request timeout in seconds; the gateway's own 504 is retried separately.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}

fn default_model() -> String {
    "deepseek/deepseek-chat".to_string()
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    2048
}

fn default_app_name() -> String {
    "Pocket".to_string()
}

fn default_app_url() -> String {
    "https://github.com/pocket-assistant/pocket".to_string()
}

fn default_system_prompt() -> String {
    "You are Pocket, a concise and friendly personal assistant. \
     Format answers in Markdown: short headings, bullet lists, and **bold** for key terms."
        .to_string()
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            model: default_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            api_key: None,
            app_name: default_app_name(),
            app_url: default_app_url(),
            system_prompt: default_system_prompt(),
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

/// Typing-speed knobs for the synthesized stream. Not part of any wire contract.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StreamingConfig {
    /// A word buffer longer than this many characters is emitted as a chunk.
    #[serde(default = "default_chunk_threshold")]
    pub chunk_threshold: usize,

    /// Pause between two emitted chunks, in milliseconds.
    #[serde(default = "default_chunk_delay_ms")]
    pub chunk_delay_ms: u64,
}

fn default_chunk_threshold() -> usize {
    20
}

fn default_chunk_delay_ms() -> u64 {
    15
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            chunk_threshold: default_chunk_threshold(),
            chunk_delay_ms: default_chunk_delay_ms(),
        }
    }
}

impl StreamingConfig {
    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }
}

/// Bounded retry of retryable gateway failures (429, 5xx, connect/timeout).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryConfig {
    /// Total attempts including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Wait before attempt n+1 is `baseDelayMs * n`.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    1000
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
        }
    }
}

/// Session persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageConfig {
    /// Sessions directory. Relative paths are resolved against the config file's parent.
    /// Omit to use the `sessions` subdirectory of the config directory.
    #[serde(default)]
    pub directory: Option<PathBuf>,

    /// Quiet period before a save scheduled by a streaming chunk is written.
    #[serde(default = "default_save_debounce_ms")]
    pub save_debounce_ms: u64,
}

fn default_save_debounce_ms() -> u64 {
    500
}

impl StorageConfig {
    pub fn save_debounce(&self) -> Duration {
        Duration::from_millis(self.save_debounce_ms)
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            directory: None,
            save_debounce_ms: default_save_debounce_ms(),
        }
    }
}

/// Resolve the gateway API key: env POCKET_API_KEY overrides config.
pub fn resolve_api_key(config: &Config) -> Option<String> {
    std::env::var("POCKET_API_KEY")
        .ok()
        .and_then(|s| {
            let t = s.trim();
            if t.is_empty() {
                None
            } else {
                Some(t.to_string())
            }
        })
        .or_else(|| {
            config
                .gateway
                .api_key
                .as_ref()
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
        })
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("POCKET_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".pocket").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path, or the default path (or POCKET_CONFIG_PATH). Missing file => default config.
/// Returns the config and the path that was used (for resolving the config directory).
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

fn config_parent(config_path: &Path) -> &Path {
    config_path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."))
}

/// Default sessions directory when no override is set: `sessions` subdirectory of the config file's parent.
pub fn sessions_dir(config_path: &Path) -> PathBuf {
    config_parent(config_path).join("sessions")
}

/// Resolve the sessions directory: `storage.directory` if set (relative paths resolved against the config file's parent), otherwise the default.
pub fn resolve_sessions_dir(config: &Config, config_path: &Path) -> PathBuf {
    match &config.storage.directory {
        Some(d) if !d.as_os_str().is_empty() => {
            if d.is_absolute() {
                d.clone()
            } else {
                config_parent(config_path).join(d)
            }
        }
        _ => sessions_dir(config_path),
    }
}
