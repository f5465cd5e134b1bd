//! OpenAI-compatible chat-completions client
//!
//! Features:
//! - Bearer-authenticated `POST {base_url}/chat/completions`
//! - JSON-object response format, fixed temperature and completion budget
//! - Optional retry with exponential backoff for timeouts, connection
//!   failures, 429 and 5xx responses (disabled by default)

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::time::sleep;

use super::{ModelClient, ModelReply, TokenUsage};
use crate::config::{ApiConfig, DEFAULT_BASE_URL};
use crate::error::{Result, SupportError, TransportError};
use crate::prompt::{ChatMessage, PromptPayload};
use crate::telemetry::MODEL;

/// Longest error body kept in a [`TransportError::Status`]
const MAX_ERROR_BODY_CHARS: usize = 500;

/// Configuration for the chat-completions client
#[derive(Debug, Clone)]
pub struct ChatClientConfig {
    /// API base URL, without the `/chat/completions` suffix
    pub base_url: String,

    /// Bearer credential
    pub api_key: String,

    /// Model identifier
    pub model: String,

    /// Sampling temperature
    pub temperature: f64,

    /// Completion token budget
    pub max_tokens: u32,

    /// Request timeout in milliseconds
    pub timeout_ms: u64,

    /// Maximum retry attempts (0 disables retrying)
    pub max_retries: u32,

    /// Initial backoff delay in milliseconds
    pub initial_backoff_ms: u64,

    /// Maximum backoff delay in milliseconds
    pub max_backoff_ms: u64,

    /// Backoff multiplier
    pub backoff_multiplier: f64,
}

impl Default for ChatClientConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: String::new(),
            model: MODEL.to_string(),
            temperature: 0.1,
            max_tokens: 500,
            timeout_ms: 30_000,
            max_retries: 0,
            initial_backoff_ms: 250,
            max_backoff_ms: 4_000,
            backoff_multiplier: 2.0,
        }
    }
}

impl ChatClientConfig {
    /// Client settings from the agent's API configuration
    pub fn from_api_config(api: &ApiConfig, api_key: impl Into<String>) -> Self {
        Self {
            base_url: api.base_url.clone(),
            api_key: api_key.into(),
            timeout_ms: api.timeout_ms,
            max_retries: api.max_retries,
            initial_backoff_ms: api.initial_backoff_ms,
            ..Default::default()
        }
    }

    /// Delay before the retry that follows a wait of `current_ms`
    fn next_backoff(&self, current_ms: u64) -> u64 {
        ((current_ms as f64 * self.backoff_multiplier) as u64).min(self.max_backoff_ms)
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    temperature: f64,
    max_tokens: u32,
    response_format: ResponseFormat,
}

#[derive(Serialize)]
struct ResponseFormat {
    #[serde(rename = "type")]
    kind: &'static str,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
    usage: Option<TokenUsage>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatResponseMessage,
}

#[derive(Deserialize)]
struct ChatResponseMessage {
    content: Option<String>,
}

/// HTTP client for OpenAI-compatible chat-completions APIs
pub struct ChatCompletionsClient {
    client: Client,
    config: ChatClientConfig,
    url: String,
}

impl ChatCompletionsClient {
    /// Create a client with custom configuration
    pub fn with_config(config: ChatClientConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| {
                SupportError::InternalError(format!("Failed to create HTTP client: {}", e))
            })?;

        let url = format!("{}/chat/completions", config.base_url.trim_end_matches('/'));

        Ok(Self { client, config, url })
    }

    pub fn builder() -> ChatCompletionsClientBuilder {
        ChatCompletionsClientBuilder::new()
    }

    /// Full endpoint URL
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Send one request, without retrying
    async fn send_once(
        &self,
        messages: &[ChatMessage],
    ) -> std::result::Result<ModelReply, TransportError> {
        let request = ChatRequest {
            model: &self.config.model,
            messages,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
            response_format: ResponseFormat { kind: "json_object" },
        };

        let response = self
            .client
            .post(&self.url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(TransportError::Status {
                status: status.as_u16(),
                body: body.chars().take(MAX_ERROR_BODY_CHARS).collect(),
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|e| {
            TransportError::InvalidResponse(format!("Failed to parse response: {}", e))
        })?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| {
                TransportError::InvalidResponse("Response contained no choices".to_string())
            })?
            .message
            .content
            .ok_or_else(|| {
                TransportError::InvalidResponse("First choice has no content".to_string())
            })?;

        Ok(ModelReply {
            content,
            usage: parsed.usage.unwrap_or_default(),
        })
    }
}

#[async_trait]
impl ModelClient for ChatCompletionsClient {
    async fn complete(
        &self,
        payload: &PromptPayload,
    ) -> std::result::Result<ModelReply, TransportError> {
        let mut backoff_ms = self.config.initial_backoff_ms;
        let mut attempt = 0;

        loop {
            match self.send_once(&payload.messages).await {
                Ok(reply) => {
                    tracing::debug!(
                        attempt = attempt,
                        prompt_tokens = reply.usage.prompt_tokens,
                        completion_tokens = reply.usage.completion_tokens,
                        "Model call succeeded"
                    );
                    return Ok(reply);
                }
                Err(e) if e.is_retryable() && attempt < self.config.max_retries => {
                    tracing::warn!(
                        attempt = attempt,
                        backoff_ms = backoff_ms,
                        error = %e,
                        "Model call failed, retrying"
                    );
                    sleep(Duration::from_millis(backoff_ms)).await;
                    backoff_ms = self.config.next_backoff(backoff_ms);
                    attempt += 1;
                }
                Err(e) => {
                    tracing::warn!(attempt = attempt, error = %e, "Model call failed");
                    return Err(e);
                }
            }
        }
    }

    fn model(&self) -> &str {
        &self.config.model
    }
}

/// Builder for ChatCompletionsClient
pub struct ChatCompletionsClientBuilder {
    config: ChatClientConfig,
}

impl ChatCompletionsClientBuilder {
    pub fn new() -> Self {
        Self {
            config: ChatClientConfig::default(),
        }
    }

    pub fn base_url(mut self, url: impl Into<String>) -> Self {
        self.config.base_url = url.into();
        self
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.config.api_key = key.into();
        self
    }

    pub fn timeout_ms(mut self, timeout: u64) -> Self {
        self.config.timeout_ms = timeout;
        self
    }

    pub fn max_retries(mut self, retries: u32) -> Self {
        self.config.max_retries = retries;
        self
    }

    pub fn initial_backoff_ms(mut self, backoff: u64) -> Self {
        self.config.initial_backoff_ms = backoff;
        self
    }

    pub fn max_backoff_ms(mut self, backoff: u64) -> Self {
        self.config.max_backoff_ms = backoff;
        self
    }

    pub fn backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.config.backoff_multiplier = multiplier;
        self
    }

    pub fn build(self) -> Result<ChatCompletionsClient> {
        ChatCompletionsClient::with_config(self.config)
    }
}

impl Default for ChatCompletionsClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
