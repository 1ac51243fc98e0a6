//! Remote model seam.
//!
//! [`LLMProvider`] is the only way the core talks to a model. The blocking
//! call returns the full reply with token counts; the streaming call hands
//! back a channel of [`StreamEvent`]s that ends after `Stop` or `Error`.

pub mod anthropic;
pub mod sse;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::error::{Result, TallyError};
use crate::session::Message;

pub use anthropic::AnthropicProvider;

/// Buffer size for provider stream channels.
pub const STREAM_CHANNEL_CAPACITY: usize = 64;

/// Everything a provider needs for one call.
#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: Option<f64>,
    pub system_prompt: Option<String>,
    /// Full history, ending with the new user message.
    pub messages: Vec<Message>,
}

/// A completed (non-streaming) reply.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LLMResponse {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub stop_reason: Option<String>,
    pub model: String,
}

impl LLMResponse {
    pub fn text(model: &str, text: &str) -> Self {
        Self {
            text: text.to_string(),
            input_tokens: 0,
            output_tokens: 0,
            stop_reason: None,
            model: model.to_string(),
        }
    }

    pub fn with_usage(mut self, input_tokens: u64, output_tokens: u64) -> Self {
        self.input_tokens = input_tokens;
        self.output_tokens = output_tokens;
        self
    }

    pub fn with_stop_reason(mut self, reason: &str) -> Self {
        self.stop_reason = Some(reason.to_string());
        self
    }
}

/// One event of a streamed reply, in arrival order.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    /// Stream opened; carries the prompt token count.
    Start { input_tokens: u64, model: String },
    /// Next text fragment.
    Delta(String),
    /// Output token count, reported near the end.
    Usage { output_tokens: u64 },
    /// Normal end of stream.
    Stop { stop_reason: Option<String> },
    /// Stream failed; no further events follow.
    Error(String),
}

/// Remote chat-completion provider.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait LLMProvider: Send + Sync {
    /// Blocking call: resolve once the whole reply is available.
    async fn chat(&self, request: ChatRequest) -> Result<LLMResponse>;

    /// Streaming call. Errors before the stream opens are returned directly;
    /// later failures arrive as [`StreamEvent::Error`].
    async fn chat_stream(&self, request: ChatRequest) -> Result<mpsc::Receiver<StreamEvent>>;

    /// Short provider name for logs.
    fn name(&self) -> &'static str;
}

/// Build a provider error from an HTTP status and response body, preferring
/// the API's own `error.message` when the body is JSON.
pub fn parse_provider_error(provider: &str, status: u16, body: &str) -> TallyError {
    let detail = serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string());
    let hint = match status {
        401 | 403 => " (check the API key)",
        429 => " (rate limited)",
        529 => " (overloaded)",
        _ => "",
    };
    TallyError::Provider(format!(
        "{} API error {}{}: {}",
        provider, status, hint, detail
    ))
}
