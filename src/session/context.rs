//! Conversation state for one session.
//!
//! History always alternates user/assistant starting with user. Every chat
//! call appends the user turn first and removes it again if the remote call
//! fails or the stream is cancelled, so no failure leaves a dangling turn.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::modes::Mode;
use super::types::{ChatEvent, Message, Role, SendOutcome, Usage};
use crate::cache::derive_key;
use crate::config::Config;
use crate::error::{Result, TallyError};
use crate::providers::{ChatRequest, LLMProvider, StreamEvent};
use crate::utils::atomic_write;

/// Snapshot format version.
const SNAPSHOT_VERSION: u32 = 1;

const MAX_SESSION_ID_LEN: usize = 64;

/// Session ids end up in snapshot file names, so only `[A-Za-z0-9_-]{1,64}`
/// is accepted.
pub fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= MAX_SESSION_ID_LEN
        && id
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_')
}

/// Per-request parameter overrides. Any field set here wins over the
/// context's stored defaults for that one request.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatOverrides {
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    pub temperature: Option<f64>,
    pub system_prompt: Option<String>,
}

/// The parameters a request is actually sent (and cached) with.
#[derive(Debug, Clone, PartialEq)]
pub struct EffectiveParams {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub system_prompt: Option<String>,
}

impl EffectiveParams {
    pub fn cache_key(&self, message: &str) -> String {
        derive_key(
            message,
            &self.model,
            self.max_tokens,
            self.temperature,
            self.system_prompt.as_deref(),
        )
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ConversationSnapshot {
    version: u32,
    session_id: String,
    system_prompt: Option<String>,
    model: String,
    temperature: f64,
    max_tokens: u32,
    #[serde(default)]
    mode: Mode,
    history: Vec<Message>,
}

#[derive(Debug, Clone)]
pub struct ConversationContext {
    session_id: String,
    system_prompt: Option<String>,
    model: String,
    temperature: f64,
    max_tokens: u32,
    mode: Mode,
    history: Vec<Message>,
}

impl ConversationContext {
    pub fn new(model: &str, max_tokens: u32, temperature: f64) -> Self {
        Self {
            session_id: uuid::Uuid::new_v4().to_string(),
            system_prompt: None,
            model: model.to_string(),
            temperature,
            max_tokens,
            mode: Mode::Default,
            history: Vec::new(),
        }
    }

    /// Context with the configured defaults. A configured mode is applied
    /// first and an explicit system prompt then takes precedence over the
    /// mode's prompt.
    pub fn from_config(config: &Config) -> Self {
        let mut ctx = Self::new(
            &config.chat.model,
            config.chat.max_tokens,
            config.chat.temperature,
        );
        if let Some(mode) = config.chat.mode.as_deref().and_then(|m| m.parse().ok()) {
            ctx.apply_mode(mode);
        }
        if let Some(prompt) = &config.chat.system_prompt {
            ctx.set_system_prompt(prompt);
        }
        ctx
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Rename the session. Fails with `InvalidSession` for ids that are
    /// not safe to use in a file name.
    pub fn with_session_id(mut self, session_id: &str) -> Result<Self> {
        if !is_valid_session_id(session_id) {
            return Err(TallyError::InvalidSession(session_id.to_string()));
        }
        self.session_id = session_id.to_string();
        Ok(self)
    }

    pub fn system_prompt(&self) -> Option<&str> {
        self.system_prompt.as_deref()
    }

    /// Set the system prompt. Blank text clears it.
    pub fn set_system_prompt(&mut self, text: &str) {
        self.system_prompt = if text.trim().is_empty() {
            None
        } else {
            Some(text.to_string())
        };
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn set_model(&mut self, model: &str) {
        self.model = model.to_string();
    }

    pub fn temperature(&self) -> f64 {
        self.temperature
    }

    pub fn max_tokens(&self) -> u32 {
        self.max_tokens
    }

    pub fn mode(&self) -> Mode {
        self.mode
    }

    /// Apply a preset's prompt and sampling parameters. History is untouched.
    pub fn apply_mode(&mut self, mode: Mode) {
        self.mode = mode;
        self.system_prompt = Some(mode.system_prompt().to_string());
        self.temperature = mode.temperature();
        self.max_tokens = mode.max_tokens();
    }

    pub fn history(&self) -> &[Message] {
        &self.history
    }

    pub fn message_count(&self) -> usize {
        self.history.len()
    }

    /// Completed user/assistant pairs.
    pub fn rounds(&self) -> usize {
        self.history.len() / 2
    }

    pub fn is_empty(&self) -> bool {
        self.history.is_empty()
    }

    /// Append a message and return a copy of it.
    pub fn add_message(&mut self, role: Role, text: &str) -> Message {
        let message = Message::new(role, text);
        self.history.push(message.clone());
        message
    }

    pub fn clear(&mut self) {
        self.history.clear();
    }

    /// Keep only the last `max_rounds` user/assistant pairs.
    pub fn trim_history(&mut self, max_rounds: usize) -> usize {
        let keep = max_rounds.saturating_mul(2);
        if self.history.len() <= keep {
            return 0;
        }
        let removed = self.history.len() - keep;
        self.history.drain(..removed);
        debug!(removed, kept = keep, "Trimmed conversation history");
        removed
    }

    /// Resolve overrides against the stored defaults.
    pub fn effective_params(&self, overrides: &ChatOverrides) -> EffectiveParams {
        let system_prompt = match &overrides.system_prompt {
            Some(s) => Some(s.clone()).filter(|s| !s.trim().is_empty()),
            None => self.system_prompt.clone(),
        };
        EffectiveParams {
            model: overrides.model.clone().unwrap_or_else(|| self.model.clone()),
            max_tokens: overrides.max_tokens.unwrap_or(self.max_tokens),
            temperature: overrides.temperature.unwrap_or(self.temperature),
            system_prompt,
        }
    }

    fn build_request(&self, params: &EffectiveParams) -> ChatRequest {
        ChatRequest {
            model: params.model.clone(),
            max_tokens: params.max_tokens,
            temperature: Some(params.temperature),
            system_prompt: params.system_prompt.clone(),
            messages: self.history.clone(),
        }
    }

    /// Drop the user turn appended for a request that did not complete.
    fn rollback_user_turn(&mut self) {
        if matches!(self.history.last(), Some(m) if m.role == Role::User) {
            self.history.pop();
        }
    }

    /// Append `text` as a user turn and record the cached reply without a
    /// remote call.
    pub fn append_exchange(&mut self, user_text: &str, reply: &str) {
        self.add_message(Role::User, user_text);
        self.add_message(Role::Assistant, reply);
    }

    /// Blocking chat turn.
    pub async fn chat(
        &mut self,
        provider: &dyn LLMProvider,
        text: &str,
        overrides: &ChatOverrides,
    ) -> Result<SendOutcome> {
        let params = self.effective_params(overrides);
        self.add_message(Role::User, text);
        let request = self.build_request(&params);

        match provider.chat(request).await {
            Ok(response) => {
                self.add_message(Role::Assistant, &response.text);
                Ok(SendOutcome {
                    content: response.text,
                    model: response.model,
                    usage: Some(Usage::new(response.input_tokens, response.output_tokens)),
                    stop_reason: response.stop_reason,
                    from_cache: false,
                })
            }
            Err(e) => {
                self.rollback_user_turn();
                warn!(provider = provider.name(), "Chat request failed: {}", e);
                Err(e)
            }
        }
    }

    /// Streaming chat turn. Each fragment is forwarded to `tx` as
    /// [`ChatEvent::Delta`]; failures send [`ChatEvent::Error`] before
    /// returning. A closed `tx` counts as cancellation. The final
    /// [`ChatEvent::Done`] is left to the caller.
    pub async fn chat_stream(
        &mut self,
        provider: &dyn LLMProvider,
        text: &str,
        overrides: &ChatOverrides,
        tx: &mpsc::Sender<ChatEvent>,
    ) -> Result<SendOutcome> {
        let params = self.effective_params(overrides);
        self.add_message(Role::User, text);
        let request = self.build_request(&params);

        let mut rx = match provider.chat_stream(request).await {
            Ok(rx) => rx,
            Err(e) => {
                self.rollback_user_turn();
                warn!(provider = provider.name(), "Stream request failed: {}", e);
                let _ = tx.send(ChatEvent::Error(e.to_string())).await;
                return Err(e);
            }
        };

        let mut content = String::new();
        let mut usage = Usage::default();
        let mut model = params.model.clone();
        let mut stop_reason = None;

        loop {
            match rx.recv().await {
                Some(StreamEvent::Start {
                    input_tokens,
                    model: m,
                }) => {
                    usage.input_tokens = input_tokens;
                    if !m.is_empty() {
                        model = m;
                    }
                }
                Some(StreamEvent::Delta(fragment)) => {
                    content.push_str(&fragment);
                    if tx.send(ChatEvent::Delta(fragment)).await.is_err() {
                        self.rollback_user_turn();
                        info!("Stream consumer went away; reply discarded");
                        return Err(TallyError::Cancelled);
                    }
                }
                Some(StreamEvent::Usage { output_tokens }) => {
                    usage.output_tokens = output_tokens;
                }
                Some(StreamEvent::Stop { stop_reason: r }) => {
                    stop_reason = r;
                    break;
                }
                Some(StreamEvent::Error(msg)) => {
                    return Err(self.fail_stream(provider, msg, tx).await);
                }
                None => {
                    let msg = "stream closed before completion".to_string();
                    return Err(self.fail_stream(provider, msg, tx).await);
                }
            }
        }

        if tx.is_closed() {
            self.rollback_user_turn();
            info!("Stream consumer went away; reply discarded");
            return Err(TallyError::Cancelled);
        }

        self.add_message(Role::Assistant, &content);
        Ok(SendOutcome {
            content,
            model,
            usage: Some(usage),
            stop_reason,
            from_cache: false,
        })
    }

    async fn fail_stream(
        &mut self,
        provider: &dyn LLMProvider,
        msg: String,
        tx: &mpsc::Sender<ChatEvent>,
    ) -> TallyError {
        self.rollback_user_turn();
        warn!(provider = provider.name(), "Stream failed: {}", msg);
        let err = TallyError::Provider(msg);
        let _ = tx.send(ChatEvent::Error(err.to_string())).await;
        err
    }

    // -- persistence ---

    /// File name used for this session's snapshot.
    pub fn snapshot_file_name(&self) -> String {
        format!("conversation_{}.json", self.session_id)
    }

    /// Write a versioned JSON snapshot.
    pub fn save(&self, path: &Path) -> Result<()> {
        let snapshot = ConversationSnapshot {
            version: SNAPSHOT_VERSION,
            session_id: self.session_id.clone(),
            system_prompt: self.system_prompt.clone(),
            model: self.model.clone(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            mode: self.mode,
            history: self.history.clone(),
        };
        let json = serde_json::to_vec_pretty(&snapshot)?;
        atomic_write(path, &json).map_err(|e| {
            TallyError::Persistence(format!("failed to write {}: {}", path.display(), e))
        })?;
        info!(path = %path.display(), messages = self.history.len(), "Saved conversation");
        Ok(())
    }

    /// Read a snapshot written by [`save`](Self::save).
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            TallyError::Persistence(format!("failed to read {}: {}", path.display(), e))
        })?;
        let snapshot: ConversationSnapshot = serde_json::from_str(&raw).map_err(|e| {
            TallyError::Persistence(format!("invalid snapshot {}: {}", path.display(), e))
        })?;
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(TallyError::Persistence(format!(
                "unsupported snapshot version {} in {}",
                snapshot.version,
                path.display()
            )));
        }
        if !is_valid_session_id(&snapshot.session_id) {
            return Err(TallyError::Persistence(format!(
                "snapshot {} has an invalid session id",
                path.display()
            )));
        }
        if !alternates(&snapshot.history) {
            return Err(TallyError::Persistence(format!(
                "snapshot {} has a malformed history",
                path.display()
            )));
        }
        Ok(Self {
            session_id: snapshot.session_id,
            system_prompt: snapshot.system_prompt,
            model: snapshot.model,
            temperature: snapshot.temperature,
            max_tokens: snapshot.max_tokens,
            mode: snapshot.mode,
            history: snapshot.history,
        })
    }

    /// Human-readable transcript.
    pub fn export_to_text(&self) -> String {
        let mut out = format!(
            "Session: {}\nModel: {}\nMode: {}\n",
            self.session_id, self.model, self.mode
        );
        if let Some(system) = &self.system_prompt {
            out.push_str(&format!("System: {}\n", system));
        }
        for message in &self.history {
            out.push_str(&format!(
                "\n[{}] {}:\n{}\n",
                message.created_at.to_rfc3339(),
                message.role,
                message.content
            ));
        }
        out
    }
}

/// Even length, starting with user, strictly alternating.
fn alternates(history: &[Message]) -> bool {
    history.len() % 2 == 0
        && history.iter().enumerate().all(|(i, m)| {
            let expected = if i % 2 == 0 {
                Role::User
            } else {
                Role::Assistant
            };
            m.role == expected
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::providers::{LLMResponse, MockLLMProvider};
    use tempfile::TempDir;

    fn ctx() -> ConversationContext {
        ConversationContext::new("claude-sonnet-4-20250514", 512, 0.5)
    }

    fn ok_provider(reply: &'static str) -> MockLLMProvider {
        let mut mock = MockLLMProvider::new();
        mock.expect_name().return_const("mock");
        mock.expect_chat().returning(move |req| {
            Ok(LLMResponse::text(&req.model, reply)
                .with_usage(10, 5)
                .with_stop_reason("end_turn"))
        });
        mock
    }

    fn failing_provider() -> MockLLMProvider {
        let mut mock = MockLLMProvider::new();
        mock.expect_name().return_const("mock");
        mock.expect_chat()
            .returning(|_| Err(TallyError::Provider("upstream 500".into())));
        mock
    }

    fn stream_provider(events: Vec<StreamEvent>) -> MockLLMProvider {
        let mut mock = MockLLMProvider::new();
        mock.expect_name().return_const("mock");
        mock.expect_chat_stream().returning(move |_| {
            let (tx, rx) = mpsc::channel(events.len().max(1));
            for ev in events.clone() {
                tx.try_send(ev).unwrap();
            }
            Ok(rx)
        });
        mock
    }

    #[tokio::test]
    async fn test_chat_appends_both_turns() {
        let mut c = ctx();
        let provider = ok_provider("hello!");
        let outcome = c.chat(&provider, "hi", &ChatOverrides::default()).await.unwrap();
        assert_eq!(outcome.content, "hello!");
        assert_eq!(outcome.usage, Some(Usage::new(10, 5)));
        assert!(!outcome.from_cache);
        assert_eq!(c.history().len(), 2);
        assert_eq!(c.history()[0].role, Role::User);
        assert_eq!(c.history()[1].content, "hello!");
    }

    #[tokio::test]
    async fn test_chat_failure_rolls_back_user_turn() {
        let mut c = ctx();
        c.chat(&ok_provider("first"), "one", &ChatOverrides::default())
            .await
            .unwrap();
        let before = c.history().len();

        let err = c
            .chat(&failing_provider(), "hi", &ChatOverrides::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "upstream_error");
        assert_eq!(c.history().len(), before);
        assert!(alternates(c.history()));
    }

    #[tokio::test]
    async fn test_request_uses_overrides_and_full_history() {
        let mut c = ctx();
        c.set_system_prompt("stored");
        c.append_exchange("earlier", "reply");

        let mut mock = MockLLMProvider::new();
        mock.expect_name().return_const("mock");
        mock.expect_chat()
            .withf(|req| {
                req.model == "claude-3-5-haiku-20241022"
                    && req.max_tokens == 64
                    && req.temperature == Some(0.5)
                    && req.system_prompt.as_deref() == Some("override")
                    && req.messages.len() == 3
                    && req.messages[2].content == "now"
            })
            .times(1)
            .returning(|req| Ok(LLMResponse::text(&req.model, "ok")));

        let overrides = ChatOverrides {
            model: Some("claude-3-5-haiku-20241022".into()),
            max_tokens: Some(64),
            system_prompt: Some("override".into()),
            ..Default::default()
        };
        c.chat(&mock, "now", &overrides).await.unwrap();
        // Overrides are per request.
        assert_eq!(c.model(), "claude-sonnet-4-20250514");
        assert_eq!(c.system_prompt(), Some("stored"));
    }

    #[test]
    fn test_effective_params_blank_override_clears_system_prompt() {
        let mut c = ctx();
        c.set_system_prompt("stored");
        let params = c.effective_params(&ChatOverrides {
            system_prompt: Some("".into()),
            ..Default::default()
        });
        assert_eq!(params.system_prompt, None);
        assert_eq!(
            params.cache_key("x"),
            derive_key("x", "claude-sonnet-4-20250514", 512, 0.5, None)
        );
    }

    #[tokio::test]
    async fn test_chat_stream_forwards_deltas_and_accumulates_usage() {
        let mut c = ctx();
        let provider = stream_provider(vec![
            StreamEvent::Start {
                input_tokens: 20,
                model: "claude-sonnet-4-20250514".into(),
            },
            StreamEvent::Delta("Hel".into()),
            StreamEvent::Delta("lo".into()),
            StreamEvent::Usage { output_tokens: 4 },
            StreamEvent::Stop {
                stop_reason: Some("end_turn".into()),
            },
        ]);
        let (tx, mut rx) = mpsc::channel(16);

        let outcome = c
            .chat_stream(&provider, "hi", &ChatOverrides::default(), &tx)
            .await
            .unwrap();
        assert_eq!(outcome.content, "Hello");
        assert_eq!(outcome.usage, Some(Usage::new(20, 4)));
        assert_eq!(outcome.stop_reason.as_deref(), Some("end_turn"));
        assert_eq!(c.history().len(), 2);

        drop(tx);
        let mut deltas = Vec::new();
        while let Some(ev) = rx.recv().await {
            deltas.push(ev);
        }
        assert_eq!(
            deltas,
            vec![ChatEvent::Delta("Hel".into()), ChatEvent::Delta("lo".into())]
        );
    }

    #[tokio::test]
    async fn test_chat_stream_error_rolls_back_and_reports() {
        let mut c = ctx();
        let provider = stream_provider(vec![
            StreamEvent::Start {
                input_tokens: 20,
                model: String::new(),
            },
            StreamEvent::Delta("partial".into()),
            StreamEvent::Error("connection reset".into()),
        ]);
        let (tx, mut rx) = mpsc::channel(16);

        let err = c
            .chat_stream(&provider, "hi", &ChatOverrides::default(), &tx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("connection reset"));
        assert!(c.is_empty());

        assert_eq!(rx.recv().await, Some(ChatEvent::Delta("partial".into())));
        assert!(matches!(rx.recv().await, Some(ChatEvent::Error(_))));
    }

    #[tokio::test]
    async fn test_chat_stream_without_stop_is_failure() {
        let mut c = ctx();
        let provider = stream_provider(vec![StreamEvent::Delta("cut".into())]);
        let (tx, _rx) = mpsc::channel(16);
        let err = c
            .chat_stream(&provider, "hi", &ChatOverrides::default(), &tx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "upstream_error");
        assert!(c.is_empty());
    }

    #[tokio::test]
    async fn test_chat_stream_cancelled_when_receiver_dropped() {
        let mut c = ctx();
        let provider = stream_provider(vec![
            StreamEvent::Delta("hello".into()),
            StreamEvent::Stop { stop_reason: None },
        ]);
        let (tx, rx) = mpsc::channel(16);
        drop(rx);

        let err = c
            .chat_stream(&provider, "hi", &ChatOverrides::default(), &tx)
            .await
            .unwrap_err();
        assert!(matches!(err, TallyError::Cancelled));
        assert!(c.is_empty());
    }

    #[test]
    fn test_trim_history_keeps_latest_rounds() {
        let mut c = ctx();
        for i in 0..5 {
            c.append_exchange(&format!("q{i}"), &format!("a{i}"));
        }
        assert_eq!(c.trim_history(2), 6);
        assert_eq!(c.rounds(), 2);
        assert_eq!(c.history()[0].content, "q3");
        assert!(alternates(c.history()));

        assert_eq!(c.trim_history(10), 0);
        c.trim_history(0);
        assert!(c.is_empty());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let tmp = TempDir::new().unwrap();
        let mut c = ctx();
        c.apply_mode(Mode::Tutor);
        c.append_exchange("what is 2+2?", "4");
        let path = tmp.path().join(c.snapshot_file_name());
        c.save(&path).unwrap();

        let loaded = ConversationContext::load(&path).unwrap();
        assert_eq!(loaded.session_id(), c.session_id());
        assert_eq!(loaded.mode(), Mode::Tutor);
        assert_eq!(loaded.system_prompt(), c.system_prompt());
        assert_eq!(loaded.history(), c.history());

        let raw: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
        assert_eq!(raw["history"][0]["role"], "user");
    }

    #[test]
    fn test_load_rejects_malformed_history() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.json");
        let doc = serde_json::json!({
            "version": 1,
            "session_id": "s",
            "system_prompt": null,
            "model": "m",
            "temperature": 0.5,
            "max_tokens": 10,
            "history": [Message::assistant("orphan")]
        });
        std::fs::write(&path, doc.to_string()).unwrap();
        let err = ConversationContext::load(&path).unwrap_err();
        assert_eq!(err.kind(), "persistence_error");
    }

    #[test]
    fn test_session_id_must_be_file_name_safe() {
        assert!(is_valid_session_id("browser-tab_1"));
        assert!(is_valid_session_id(ctx().session_id()));
        assert!(is_valid_session_id(&"a".repeat(64)));
        let too_long = "a".repeat(65);
        for bad in ["", "../x", "a/../../../escaped", "a b", "x.json", "é", too_long.as_str()] {
            assert!(!is_valid_session_id(bad), "{bad:?} accepted");
        }

        let err = ctx().with_session_id("a/../../../escaped").unwrap_err();
        assert!(matches!(err, TallyError::InvalidSession(_)));
        let named = ctx().with_session_id("tab-1").unwrap();
        assert_eq!(named.snapshot_file_name(), "conversation_tab-1.json");
    }

    #[test]
    fn test_load_rejects_unsafe_session_id() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("crafted.json");
        let doc = serde_json::json!({
            "version": 1,
            "session_id": "../../outside",
            "system_prompt": null,
            "model": "m",
            "temperature": 0.5,
            "max_tokens": 10,
            "history": []
        });
        std::fs::write(&path, doc.to_string()).unwrap();
        let err = ConversationContext::load(&path).unwrap_err();
        assert!(matches!(err, TallyError::Persistence(_)));
    }

    #[test]
    fn test_load_missing_file_is_persistence_error() {
        let tmp = TempDir::new().unwrap();
        let err = ConversationContext::load(&tmp.path().join("nope.json")).unwrap_err();
        assert!(matches!(err, TallyError::Persistence(_)));
    }

    #[test]
    fn test_export_to_text_preserves_order_and_timestamps() {
        let mut c = ctx();
        c.append_exchange("first", "second");
        let text = c.export_to_text();
        let first = text.find("user:\nfirst").unwrap();
        let second = text.find("assistant:\nsecond").unwrap();
        assert!(first < second);
        assert!(text.contains(&c.history()[0].created_at.to_rfc3339()));
    }

    #[test]
    fn test_from_config_applies_mode_then_prompt() {
        let mut config = Config::default();
        config.chat.mode = Some("concise".into());
        let c = ConversationContext::from_config(&config);
        assert_eq!(c.mode(), Mode::Concise);
        assert_eq!(c.max_tokens(), Mode::Concise.max_tokens());

        config.chat.system_prompt = Some("custom".into());
        let c = ConversationContext::from_config(&config);
        assert_eq!(c.system_prompt(), Some("custom"));
    }
}
