//! Model API clients
//!
//! The orchestrator only sees the [`ModelClient`] trait. [`ChatCompletionsClient`]
//! talks to any OpenAI-compatible `/chat/completions` endpoint; tests can plug
//! in an in-process stub instead. A failover client across several providers
//! would also sit behind this trait.

pub mod chat;

pub use chat::{ChatCompletionsClient, ChatCompletionsClientBuilder, ChatClientConfig};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::TransportError;
use crate::prompt::PromptPayload;

/// Token counts reported by the API
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub prompt_tokens: u64,
    #[serde(default)]
    pub completion_tokens: u64,
    #[serde(default)]
    pub total_tokens: u64,
}

/// Raw text of the first choice plus billing usage
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ModelReply {
    pub content: String,
    pub usage: TokenUsage,
}

/// Sends an assembled prompt to a language model
#[async_trait]
pub trait ModelClient: Send + Sync {
    /// Complete the prompt; any failure to obtain reply text is a
    /// [`TransportError`]
    async fn complete(&self, payload: &PromptPayload) -> Result<ModelReply, TransportError>;

    /// Model identifier sent with each request
    fn model(&self) -> &str;
}
