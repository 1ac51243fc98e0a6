//! Anthropic Messages API provider.
//!
//! Blocking calls POST `/v1/messages` and read `content[].text` plus `usage`.
//! Streaming calls set `"stream": true` and translate the SSE events:
//! - `message_start`: `message.usage.input_tokens`
//! - `content_block_delta` with `delta.type == "text_delta"`: text fragment
//! - `message_delta`: `delta.stop_reason` and `usage.output_tokens`
//! - `message_stop`: end of stream
//! - `error`: `error.message`

use std::time::Duration;

use async_trait::async_trait;
use futures::StreamExt;
use reqwest::Client;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::sse::{SseDecoder, SseEvent};
use super::{
    parse_provider_error, ChatRequest, LLMProvider, LLMResponse, StreamEvent,
    STREAM_CHANNEL_CAPACITY,
};
use crate::config::Config;
use crate::error::{Result, TallyError};

/// Value of the `anthropic-version` header.
const API_VERSION: &str = "2023-06-01";

pub struct AnthropicProvider {
    api_key: String,
    base_url: String,
    client: Client,
}

impl std::fmt::Debug for AnthropicProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnthropicProvider")
            .field("api_key", &"[REDACTED]")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl AnthropicProvider {
    pub fn new(api_key: &str, base_url: &str, timeout_secs: u64) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| TallyError::Config(format!("failed to build HTTP client: {}", e)))?;
        Ok(Self {
            api_key: api_key.to_string(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// Build from config. Fails with a config error when no API key is set.
    pub fn from_config(config: &Config) -> Result<Self> {
        let key = config.require_api_key()?;
        Self::new(key, &config.provider.base_url, config.provider.timeout_secs)
    }

    fn messages_url(&self) -> String {
        format!("{}/v1/messages", self.base_url)
    }

    /// Request body for the Messages API.
    pub fn build_body(request: &ChatRequest, stream: bool) -> Value {
        let messages: Vec<Value> = request
            .messages
            .iter()
            .map(|m| json!({ "role": m.role.as_str(), "content": &m.content }))
            .collect();

        let mut body = json!({
            "model": &request.model,
            "max_tokens": request.max_tokens,
            "messages": messages,
        });
        if let Some(t) = request.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(system) = request.system_prompt.as_deref().filter(|s| !s.trim().is_empty()) {
            body["system"] = json!(system);
        }
        if stream {
            body["stream"] = json!(true);
        }
        body
    }

    /// Extract text, usage and stop reason from a Messages API response.
    pub fn parse_response(json: &Value, requested_model: &str) -> LLMResponse {
        let text: String = json["content"]
            .as_array()
            .map(|blocks| {
                blocks
                    .iter()
                    .filter(|b| b["type"].as_str() == Some("text"))
                    .filter_map(|b| b["text"].as_str())
                    .collect()
            })
            .unwrap_or_default();
        let model = json["model"].as_str().unwrap_or(requested_model);

        let mut response = LLMResponse::text(model, &text).with_usage(
            json["usage"]["input_tokens"].as_u64().unwrap_or(0),
            json["usage"]["output_tokens"].as_u64().unwrap_or(0),
        );
        if let Some(reason) = json["stop_reason"].as_str() {
            response = response.with_stop_reason(reason);
        }
        response
    }

    /// Translate one SSE event into a stream event. Events the core does not
    /// care about (`ping`, block start/stop, tool deltas) map to `None`.
    pub fn translate_event(event: &SseEvent) -> Option<StreamEvent> {
        let data: Value = match serde_json::from_str(&event.data) {
            Ok(v) => v,
            Err(e) => {
                warn!("Skipping malformed SSE payload: {}", e);
                return None;
            }
        };
        let kind = event
            .event_type
            .as_deref()
            .or_else(|| data["type"].as_str())?;

        match kind {
            "message_start" => Some(StreamEvent::Start {
                input_tokens: data["message"]["usage"]["input_tokens"]
                    .as_u64()
                    .unwrap_or(0),
                model: data["message"]["model"].as_str().unwrap_or("").to_string(),
            }),
            "content_block_delta" => {
                if data["delta"]["type"].as_str() == Some("text_delta") {
                    data["delta"]["text"]
                        .as_str()
                        .map(|t| StreamEvent::Delta(t.to_string()))
                } else {
                    None
                }
            }
            "message_delta" => data["usage"]["output_tokens"]
                .as_u64()
                .map(|output_tokens| StreamEvent::Usage { output_tokens }),
            "message_stop" => Some(StreamEvent::Stop { stop_reason: None }),
            "error" => Some(StreamEvent::Error(
                data["error"]["message"]
                    .as_str()
                    .unwrap_or("unknown streaming error")
                    .to_string(),
            )),
            _ => None,
        }
    }

    async fn send(&self, body: &Value) -> Result<reqwest::Response> {
        let response = self
            .client
            .post(self.messages_url())
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", API_VERSION)
            .header("content-type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| TallyError::Provider(format!("Anthropic request failed: {}", e)))?;

        if response.status().is_success() {
            return Ok(response);
        }
        let status = response.status().as_u16();
        let error_text = response.text().await.unwrap_or_default();
        Err(parse_provider_error("Anthropic", status, &error_text))
    }
}

#[async_trait]
impl LLMProvider for AnthropicProvider {
    async fn chat(&self, request: ChatRequest) -> Result<LLMResponse> {
        debug!(model = %request.model, messages = request.messages.len(), "Anthropic request");
        let body = Self::build_body(&request, false);
        let response = self.send(&body).await?;
        let json: Value = response.json().await.map_err(|e| {
            TallyError::Provider(format!("Failed to parse Anthropic response: {}", e))
        })?;
        Ok(Self::parse_response(&json, &request.model))
    }

    async fn chat_stream(&self, request: ChatRequest) -> Result<mpsc::Receiver<StreamEvent>> {
        debug!(model = %request.model, messages = request.messages.len(), "Anthropic stream request");
        let body = Self::build_body(&request, true);
        let response = self.send(&body).await?;

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            let mut bytes = response.bytes_stream();
            let mut decoder = SseDecoder::new();
            let mut stop_reason: Option<String> = None;

            while let Some(chunk) = bytes.next().await {
                let chunk = match chunk {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = tx
                            .send(StreamEvent::Error(format!("Anthropic stream failed: {}", e)))
                            .await;
                        return;
                    }
                };
                for event in decoder.feed(&chunk) {
                    // message_delta carries the stop reason ahead of message_stop.
                    if event.event_type.as_deref() == Some("message_delta") {
                        if let Ok(v) = serde_json::from_str::<Value>(&event.data) {
                            stop_reason = v["delta"]["stop_reason"].as_str().map(str::to_string);
                        }
                    }
                    let Some(mut translated) = Self::translate_event(&event) else {
                        continue;
                    };
                    if let StreamEvent::Stop { stop_reason: r } = &mut translated {
                        *r = stop_reason.take();
                    }
                    let terminal =
                        matches!(translated, StreamEvent::Stop { .. } | StreamEvent::Error(_));
                    if tx.send(translated).await.is_err() {
                        debug!("Stream receiver dropped; abandoning response");
                        return;
                    }
                    if terminal {
                        return;
                    }
                }
            }

            let trailing = decoder.finish().and_then(|e| Self::translate_event(&e));
            let last = match trailing {
                Some(StreamEvent::Stop { .. }) => StreamEvent::Stop { stop_reason },
                Some(other @ StreamEvent::Error(_)) => other,
                _ => StreamEvent::Error("Anthropic stream ended without message_stop".into()),
            };
            let _ = tx.send(last).await;
        });

        Ok(rx)
    }

    fn name(&self) -> &'static str {
        "anthropic"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::Message;

    fn request() -> ChatRequest {
        ChatRequest {
            model: "claude-sonnet-4-20250514".into(),
            max_tokens: 256,
            temperature: Some(0.2),
            system_prompt: Some("be brief".into()),
            messages: vec![
                Message::user("hi"),
                Message::assistant("hello"),
                Message::user("how are you?"),
            ],
        }
    }

    fn sse(event_type: &str, data: Value) -> SseEvent {
        SseEvent {
            event_type: Some(event_type.to_string()),
            data: data.to_string(),
        }
    }

    #[test]
    fn test_build_body_fields() {
        let body = AnthropicProvider::build_body(&request(), false);
        assert_eq!(body["model"], "claude-sonnet-4-20250514");
        assert_eq!(body["max_tokens"], 256);
        assert_eq!(body["temperature"], 0.2);
        assert_eq!(body["system"], "be brief");
        assert_eq!(body["messages"].as_array().unwrap().len(), 3);
        assert_eq!(body["messages"][1]["role"], "assistant");
        assert!(body.get("stream").is_none());
    }

    #[test]
    fn test_build_body_stream_and_blank_system() {
        let mut req = request();
        req.system_prompt = Some("  ".into());
        req.temperature = None;
        let body = AnthropicProvider::build_body(&req, true);
        assert_eq!(body["stream"], true);
        assert!(body.get("system").is_none());
        assert!(body.get("temperature").is_none());
    }

    #[test]
    fn test_parse_response() {
        let json = json!({
            "model": "claude-sonnet-4-20250514",
            "content": [
                {"type": "text", "text": "Hello "},
                {"type": "text", "text": "there"}
            ],
            "stop_reason": "end_turn",
            "usage": {"input_tokens": 12, "output_tokens": 3}
        });
        let resp = AnthropicProvider::parse_response(&json, "fallback");
        assert_eq!(resp.text, "Hello there");
        assert_eq!(resp.input_tokens, 12);
        assert_eq!(resp.output_tokens, 3);
        assert_eq!(resp.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(resp.model, "claude-sonnet-4-20250514");
    }

    #[test]
    fn test_parse_response_missing_fields() {
        let resp = AnthropicProvider::parse_response(&json!({}), "fallback");
        assert_eq!(resp.text, "");
        assert_eq!(resp.model, "fallback");
        assert_eq!(resp.input_tokens, 0);
    }

    #[test]
    fn test_translate_message_start() {
        let ev = sse(
            "message_start",
            json!({"type": "message_start", "message": {"model": "m", "usage": {"input_tokens": 25}}}),
        );
        assert_eq!(
            AnthropicProvider::translate_event(&ev),
            Some(StreamEvent::Start {
                input_tokens: 25,
                model: "m".into()
            })
        );
    }

    #[test]
    fn test_translate_text_delta_only() {
        let text = sse(
            "content_block_delta",
            json!({"type": "content_block_delta", "delta": {"type": "text_delta", "text": "Hi"}}),
        );
        assert_eq!(
            AnthropicProvider::translate_event(&text),
            Some(StreamEvent::Delta("Hi".into()))
        );

        let tool = sse(
            "content_block_delta",
            json!({"type": "content_block_delta", "delta": {"type": "input_json_delta", "partial_json": "{"}}),
        );
        assert_eq!(AnthropicProvider::translate_event(&tool), None);
    }

    #[test]
    fn test_translate_usage_stop_and_error() {
        let delta = sse(
            "message_delta",
            json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 7}}),
        );
        assert_eq!(
            AnthropicProvider::translate_event(&delta),
            Some(StreamEvent::Usage { output_tokens: 7 })
        );

        let stop = sse("message_stop", json!({"type": "message_stop"}));
        assert_eq!(
            AnthropicProvider::translate_event(&stop),
            Some(StreamEvent::Stop { stop_reason: None })
        );

        let err = sse(
            "error",
            json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}}),
        );
        assert_eq!(
            AnthropicProvider::translate_event(&err),
            Some(StreamEvent::Error("Overloaded".into()))
        );
    }

    #[test]
    fn test_translate_ignores_ping_and_garbage() {
        assert_eq!(
            AnthropicProvider::translate_event(&sse("ping", json!({"type": "ping"}))),
            None
        );
        let garbage = SseEvent {
            event_type: Some("content_block_delta".into()),
            data: "not json".into(),
        };
        assert_eq!(AnthropicProvider::translate_event(&garbage), None);
    }

    #[test]
    fn test_from_config_requires_key() {
        let config = Config::default();
        assert!(matches!(
            AnthropicProvider::from_config(&config),
            Err(TallyError::Config(_))
        ));
    }

    #[test]
    fn test_debug_redacts_key() {
        let provider = AnthropicProvider::new("sk-secret", "https://api.anthropic.com/", 30).unwrap();
        let debug = format!("{:?}", provider);
        assert!(!debug.contains("sk-secret"));
        assert!(debug.contains("[REDACTED]"));
        assert_eq!(provider.messages_url(), "https://api.anthropic.com/v1/messages");
    }
}
