//! Hosted completion gateway client (OpenAI-compatible `/chat/completions`, non-streaming).

use crate::config::{self, Config};
use crate::llm::{extract_content, CompletionBackend, GatewayError, HistoryEntry};
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;

/// Client for the completion gateway.
#[derive(Clone)]
pub struct CompletionClient {
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    max_tokens: u32,
    app_name: String,
    app_url: String,
    client: reqwest::Client,
}

#[derive(Debug, Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [HistoryEntry],
    stream: bool,
    temperature: f32,
    max_tokens: u32,
}

impl CompletionClient {
    pub fn new(base_url: Option<String>, api_key: Option<String>) -> Self {
        let defaults = config::GatewayConfig::default();
        let base_url = base_url
            .unwrap_or(defaults.base_url)
            .trim_end_matches('/')
            .to_string();
        Self {
            endpoint: format!("{}/chat/completions", base_url),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
            model: defaults.model,
            temperature: defaults.temperature,
            max_tokens: defaults.max_tokens,
            app_name: defaults.app_name,
            app_url: defaults.app_url,
            client: reqwest::Client::new(),
        }
    }

    /// Build from config; the API key is resolved through env override (POCKET_API_KEY).
    pub fn from_config(config: &Config) -> Result<Self, GatewayError> {
        let gateway = &config.gateway;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(gateway.request_timeout_secs.max(1)))
            .build()?;
        let mut this = Self::new(
            Some(gateway.base_url.clone()),
            config::resolve_api_key(config),
        )
        .with_model(gateway.model.clone())
        .with_sampling(gateway.temperature, gateway.max_tokens);
        this.app_name = gateway.app_name.clone();
        this.app_url = gateway.app_url.clone();
        this.client = client;
        Ok(this)
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    pub fn with_sampling(mut self, temperature: f32, max_tokens: u32) -> Self {
        self.temperature = temperature;
        self.max_tokens = max_tokens;
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }
}

#[async_trait]
impl CompletionBackend for CompletionClient {
    /// POST {base}/chat/completions with `stream: false`; returns the extracted reply text.
    async fn complete(&self, messages: &[HistoryEntry]) -> Result<String, GatewayError> {
        let api_key = self.api_key.as_deref().ok_or(GatewayError::MissingApiKey)?;
        let body = CompletionRequest {
            model: &self.model,
            messages,
            stream: false,
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };
        log::debug!(
            "gateway: POST {} model={} messages={}",
            self.endpoint,
            self.model,
            messages.len()
        );
        let res = self
            .client
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .header("HTTP-Referer", &self.app_url)
            .header("X-Title", &self.app_name)
            .json(&body)
            .send()
            .await?;
        if !res.status().is_success() {
            let status = res.status().as_u16();
            let body = res.text().await.unwrap_or_default();
            return Err(GatewayError::Status { status, body });
        }
        let text = res.text().await?;
        extract_content(&text)
    }
}
