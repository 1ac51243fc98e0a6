//! Request pipeline: cache lookup, budget gate, remote call, record and store.
//!
//! One [`ChatPipeline`] owns one session's conversation and ledger and
//! shares the response cache with every other session of the process.
//! Operations on a pipeline take `&mut self`, so a session never has two
//! requests in flight at once.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::budget::{BudgetReport, BudgetStatus, BudgetTracker};
use crate::cache::{CacheStats, SharedCache};
use crate::config::Config;
use crate::error::{Result, TallyError};
use crate::providers::LLMProvider;
use crate::session::{ChatEvent, ChatOverrides, ConversationContext, Mode, SendOutcome, Usage};
use crate::utils::short;

/// Read-only summary of a session.
#[derive(Debug, Clone, Serialize)]
pub struct StatusSnapshot {
    pub session_id: String,
    pub model: String,
    pub mode: Mode,
    pub message_count: usize,
    pub rounds: usize,
    pub budget: BudgetStatus,
    pub cache: CacheStats,
}

/// One row of the price table as shown in reports.
#[derive(Debug, Clone, Serialize)]
pub struct PricingRow {
    pub model: String,
    pub display_name: String,
}

/// Status plus the full budget report.
#[derive(Debug, Clone, Serialize)]
pub struct DetailedReport {
    pub status: StatusSnapshot,
    pub budget: BudgetReport,
    pub pricing: Vec<PricingRow>,
}

/// Flat result shape handed to the CLI and HTTP layers.
#[derive(Debug, Clone, Serialize)]
pub struct SendResponse {
    pub success: bool,
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub from_cache: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

impl From<Result<SendOutcome>> for SendResponse {
    fn from(result: Result<SendOutcome>) -> Self {
        match result {
            Ok(outcome) => Self {
                success: true,
                content: Some(outcome.content),
                error: None,
                error_kind: None,
                from_cache: Some(outcome.from_cache),
                usage: outcome.usage,
            },
            Err(e) => Self {
                success: false,
                content: None,
                error: Some(e.to_string()),
                error_kind: Some(e.kind().to_string()),
                from_cache: None,
                usage: None,
            },
        }
    }
}

pub struct ChatPipeline {
    context: ConversationContext,
    tracker: BudgetTracker,
    cache: SharedCache,
    provider: Arc<dyn LLMProvider>,
    data_dir: PathBuf,
}

impl std::fmt::Debug for ChatPipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatPipeline")
            .field("session_id", &self.context.session_id())
            .field("provider", &self.provider.name())
            .field("data_dir", &self.data_dir)
            .finish()
    }
}

impl ChatPipeline {
    pub fn new(
        context: ConversationContext,
        tracker: BudgetTracker,
        cache: SharedCache,
        provider: Arc<dyn LLMProvider>,
        data_dir: PathBuf,
    ) -> Self {
        Self {
            context,
            tracker,
            cache,
            provider,
            data_dir,
        }
    }

    /// Fresh session from config, sharing `cache`.
    pub fn from_config(config: &Config, provider: Arc<dyn LLMProvider>, cache: SharedCache) -> Self {
        Self::new(
            ConversationContext::from_config(config),
            BudgetTracker::from_config(config),
            cache,
            provider,
            config.data_dir(),
        )
    }

    pub fn context(&self) -> &ConversationContext {
        &self.context
    }

    pub fn context_mut(&mut self) -> &mut ConversationContext {
        &mut self.context
    }

    pub fn tracker(&self) -> &BudgetTracker {
        &self.tracker
    }

    pub fn tracker_mut(&mut self) -> &mut BudgetTracker {
        &mut self.tracker
    }

    pub fn cache(&self) -> &SharedCache {
        &self.cache
    }

    pub fn session_id(&self) -> &str {
        self.context.session_id()
    }

    /// Cached reply for `text` under the effective parameters, if any.
    async fn lookup(&self, key: &str) -> Option<String> {
        self.cache.lock().await.get(key)
    }

    fn cached_outcome(&mut self, text: &str, model: String, content: String) -> SendOutcome {
        self.context.append_exchange(text, &content);
        SendOutcome {
            content,
            model,
            usage: None,
            stop_reason: None,
            from_cache: true,
        }
    }

    fn gate(&self) -> Result<()> {
        self.tracker
            .ensure_within_budget()
            .map(|_| ())
            .inspect_err(|e| warn!("Request denied: {}", e))
    }

    async fn record_and_store(&mut self, key: &str, outcome: &SendOutcome) {
        let usage = outcome.usage.unwrap_or_default();
        self.tracker.record_call(
            usage.input_tokens,
            usage.output_tokens,
            &outcome.model,
            None,
        );
        if outcome.content.is_empty() {
            debug!(key = %short(key, 8), "Empty reply; not cached");
            return;
        }
        self.cache.lock().await.set(key, &outcome.content);
    }

    /// Send one message and wait for the full reply.
    pub async fn send_message(
        &mut self,
        text: &str,
        overrides: &ChatOverrides,
    ) -> Result<SendOutcome> {
        let params = self.context.effective_params(overrides);
        let key = params.cache_key(text);

        if let Some(content) = self.lookup(&key).await {
            debug!(key = %key, "Cache hit");
            return Ok(self.cached_outcome(text, params.model, content));
        }

        self.gate()?;

        let provider = Arc::clone(&self.provider);
        let outcome = self.context.chat(provider.as_ref(), text, overrides).await?;
        self.record_and_store(&key, &outcome).await;
        Ok(outcome)
    }

    /// Streaming variant of [`send_message`](Self::send_message).
    ///
    /// Fragments go to `tx` as they arrive, followed by exactly one `Done`
    /// or `Error`. Dropping the receiver cancels the request: nothing is
    /// committed to history, recorded or cached.
    pub async fn send_message_stream(
        &mut self,
        text: &str,
        overrides: &ChatOverrides,
        tx: mpsc::Sender<ChatEvent>,
    ) -> Result<SendOutcome> {
        let params = self.context.effective_params(overrides);
        let key = params.cache_key(text);

        if let Some(content) = self.lookup(&key).await {
            debug!(key = %key, "Cache hit (stream)");
            if tx.is_closed() {
                info!("Stream consumer went away; cached reply not committed");
                return Err(TallyError::Cancelled);
            }
            let outcome = self.cached_outcome(text, params.model, content);
            let _ = tx.send(ChatEvent::Delta(outcome.content.clone())).await;
            let _ = tx.send(ChatEvent::Done(outcome.clone())).await;
            return Ok(outcome);
        }

        if let Err(e) = self.gate() {
            let _ = tx.send(ChatEvent::Error(e.to_string())).await;
            return Err(e);
        }

        let provider = Arc::clone(&self.provider);
        let outcome = self
            .context
            .chat_stream(provider.as_ref(), text, overrides, &tx)
            .await?;
        self.record_and_store(&key, &outcome).await;
        let _ = tx.send(ChatEvent::Done(outcome.clone())).await;
        Ok(outcome)
    }

    pub async fn status(&self) -> StatusSnapshot {
        StatusSnapshot {
            session_id: self.context.session_id().to_string(),
            model: self.context.model().to_string(),
            mode: self.context.mode(),
            message_count: self.context.message_count(),
            rounds: self.context.rounds(),
            budget: self.tracker.check_budget(),
            cache: self.cache.lock().await.stats(),
        }
    }

    pub async fn detailed_report(&self) -> DetailedReport {
        let pricing = self
            .tracker
            .prices()
            .models()
            .into_iter()
            .map(|(model, display_name)| PricingRow {
                model: model.to_string(),
                display_name: display_name.to_string(),
            })
            .collect();
        DetailedReport {
            status: self.status().await,
            budget: self.tracker.report(),
            pricing,
        }
    }

    /// Switch to a preset mode.
    ///
    /// A non-empty conversation is saved first, then history is cleared and
    /// the preset applied. A failed save is logged and does not block the
    /// switch. Unknown ids change nothing.
    pub fn switch_mode(&mut self, mode_id: &str) -> Result<Mode> {
        let mode: Mode = mode_id.parse()?;
        if !self.context.is_empty() {
            if let Err(e) = self.save() {
                warn!("Auto-save before mode switch failed: {}", e);
            }
        }
        self.context.clear();
        self.context.apply_mode(mode);
        info!(mode = %mode, session = %self.context.session_id(), "Switched mode");
        Ok(mode)
    }

    /// Clear the conversation and the cost ledger. The cache is kept.
    pub fn reset(&mut self) {
        self.context.clear();
        self.tracker.reset();
        info!(session = %self.context.session_id(), "Session reset");
    }

    /// Path [`save`](Self::save) writes to.
    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(self.context.snapshot_file_name())
    }

    /// Write the conversation snapshot into the data dir.
    pub fn save(&self) -> Result<PathBuf> {
        let path = self.snapshot_path();
        self.context.save(&path)?;
        Ok(path)
    }

    /// Replace the conversation with a saved snapshot. The ledger is kept.
    pub fn load(&mut self, path: &Path) -> Result<()> {
        self.context = ConversationContext::load(path)?;
        info!(
            session = %self.context.session_id(),
            messages = self.context.message_count(),
            "Loaded conversation"
        );
        Ok(())
    }

    /// Remove expired cache entries.
    pub async fn cleanup_cache(&self) -> usize {
        let removed = self.cache.lock().await.cleanup_expired();
        if removed > 0 {
            info!(removed, "Removed expired cache entries");
        }
        removed
    }

    pub fn export_csv(&self, path: &Path) -> Result<usize> {
        self.tracker.export_csv(path)
    }

    /// `Err(BudgetExceeded)` when the next uncached request would be denied.
    pub fn ensure_budget(&self) -> Result<BudgetStatus> {
        self.tracker.ensure_within_budget()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::budget::{ModelPrice, PriceTable};
    use crate::cache::{shared, ResponseCache};
    use crate::providers::{LLMResponse, MockLLMProvider, StreamEvent};
    use tempfile::TempDir;

    const MODEL: &str = "claude-sonnet-4-20250514";

    fn pipeline(provider: MockLLMProvider, limit: f64, tmp: &TempDir) -> ChatPipeline {
        pipeline_with_cache(provider, limit, tmp, ResponseCache::new(3600, 100))
    }

    fn pipeline_with_cache(
        provider: MockLLMProvider,
        limit: f64,
        tmp: &TempDir,
        cache: ResponseCache,
    ) -> ChatPipeline {
        ChatPipeline::new(
            ConversationContext::new(MODEL, 256, 0.5),
            BudgetTracker::new(limit, 0.8, PriceTable::default()),
            shared(cache),
            Arc::new(provider),
            tmp.path().to_path_buf(),
        )
    }

    fn provider_replying(reply: &'static str, times: usize) -> MockLLMProvider {
        let mut mock = MockLLMProvider::new();
        mock.expect_name().return_const("mock");
        mock.expect_chat().times(times).returning(move |req| {
            Ok(LLMResponse::text(&req.model, reply).with_usage(1000, 500))
        });
        mock
    }

    #[tokio::test]
    async fn test_second_identical_request_served_from_cache() {
        let tmp = TempDir::new().unwrap();
        let mut p = pipeline(provider_replying("Paris", 1), 5.0, &tmp);
        let none = ChatOverrides::default();

        let first = p.send_message("capital of France?", &none).await.unwrap();
        assert!(!first.from_cache);
        assert_eq!(first.usage, Some(Usage::new(1000, 500)));

        let second = p.send_message("capital of France?", &none).await.unwrap();
        assert!(second.from_cache);
        assert_eq!(second.content, "Paris");
        assert_eq!(second.usage, None);

        // Both exchanges are in history; only the first was billed.
        assert_eq!(p.context().message_count(), 4);
        assert_eq!(p.tracker().calls().len(), 1);
        let stats = p.cache().lock().await.stats();
        assert_eq!((stats.hits, stats.misses, stats.sets), (1, 1, 1));
    }

    #[tokio::test]
    async fn test_different_params_miss_the_cache() {
        let tmp = TempDir::new().unwrap();
        let mut p = pipeline(provider_replying("ok", 2), 5.0, &tmp);
        p.send_message("hi", &ChatOverrides::default()).await.unwrap();
        let hot = ChatOverrides {
            temperature: Some(0.9),
            ..Default::default()
        };
        let outcome = p.send_message("hi", &hot).await.unwrap();
        assert!(!outcome.from_cache);
    }

    #[tokio::test]
    async fn test_over_budget_denies_without_remote_call() {
        let tmp = TempDir::new().unwrap();
        let mut p = pipeline(provider_replying("never", 0), 0.50, &tmp);
        p.tracker_mut()
            .set_price(MODEL, ModelPrice::new(0.0, 15.0, "Sonnet"));
        p.tracker_mut().record_call(0, 40_000, MODEL, None);
        assert!(p.tracker().check_budget().is_over_budget);

        let err = p
            .send_message("hello", &ChatOverrides::default())
            .await
            .unwrap_err();
        assert!(matches!(err, TallyError::BudgetExceeded { .. }));
        assert!(p.context().is_empty());
        assert_eq!(p.tracker().calls().len(), 1);
        assert!(p.cache().lock().await.is_empty());

        let response = SendResponse::from(Err::<SendOutcome, _>(err));
        assert!(!response.success);
        assert_eq!(response.error_kind.as_deref(), Some("budget_exceeded"));
    }

    #[tokio::test]
    async fn test_cache_hit_served_even_when_over_budget() {
        let tmp = TempDir::new().unwrap();
        let mut p = pipeline(provider_replying("cached answer", 1), 0.01, &tmp);
        p.send_message("q", &ChatOverrides::default()).await.unwrap();
        assert!(p.tracker().check_budget().is_over_budget);

        let again = p.send_message("q", &ChatOverrides::default()).await.unwrap();
        assert!(again.from_cache);
        assert_eq!(again.content, "cached answer");
    }

    #[tokio::test]
    async fn test_upstream_failure_rolls_back_and_records_nothing() {
        let tmp = TempDir::new().unwrap();
        let mut mock = MockLLMProvider::new();
        mock.expect_name().return_const("mock");
        mock.expect_chat()
            .times(1)
            .returning(|_| Err(TallyError::Provider("503 overloaded".into())));
        let mut p = pipeline(mock, 5.0, &tmp);

        let before = p.context().message_count();
        let err = p.send_message("hi", &ChatOverrides::default()).await.unwrap_err();
        assert_eq!(err.kind(), "upstream_error");
        assert!(err.is_retryable());
        assert_eq!(p.context().message_count(), before);
        assert!(p.tracker().calls().is_empty());
        assert!(p.cache().lock().await.is_empty());
    }

    #[tokio::test]
    async fn test_disabled_cache_always_calls_remote() {
        let tmp = TempDir::new().unwrap();
        let cache = ResponseCache::new(3600, 10).with_enabled(false);
        let mut p = pipeline_with_cache(provider_replying("fresh", 2), 5.0, &tmp, cache);
        p.send_message("same", &ChatOverrides::default()).await.unwrap();
        let second = p.send_message("same", &ChatOverrides::default()).await.unwrap();
        assert!(!second.from_cache);
        let stats = p.cache().lock().await.stats();
        assert_eq!((stats.hits, stats.misses, stats.sets), (0, 0, 0));
    }

    #[tokio::test]
    async fn test_stream_records_caches_and_finishes_with_done() {
        let tmp = TempDir::new().unwrap();
        let mut mock = MockLLMProvider::new();
        mock.expect_name().return_const("mock");
        mock.expect_chat_stream().times(1).returning(|_| {
            let (tx, rx) = mpsc::channel(8);
            tx.try_send(StreamEvent::Start {
                input_tokens: 30,
                model: MODEL.into(),
            })
            .unwrap();
            tx.try_send(StreamEvent::Delta("Hi ".into())).unwrap();
            tx.try_send(StreamEvent::Delta("there".into())).unwrap();
            tx.try_send(StreamEvent::Usage { output_tokens: 2 }).unwrap();
            tx.try_send(StreamEvent::Stop { stop_reason: None }).unwrap();
            Ok(rx)
        });
        let mut p = pipeline(mock, 5.0, &tmp);

        let (tx, mut rx) = mpsc::channel(16);
        let outcome = p
            .send_message_stream("hello", &ChatOverrides::default(), tx)
            .await
            .unwrap();
        assert_eq!(outcome.content, "Hi there");
        assert_eq!(p.tracker().calls()[0].input_tokens, 30);
        assert_eq!(p.tracker().calls()[0].output_tokens, 2);

        let mut events = Vec::new();
        while let Some(ev) = rx.recv().await {
            events.push(ev);
        }
        assert_eq!(events.len(), 3);
        assert!(matches!(events.last(), Some(ChatEvent::Done(o)) if o.content == "Hi there"));

        // Same request again: served from cache as one delta.
        let (tx, mut rx) = mpsc::channel(16);
        let cached = p
            .send_message_stream("hello", &ChatOverrides::default(), tx)
            .await
            .unwrap();
        assert!(cached.from_cache);
        assert_eq!(rx.recv().await, Some(ChatEvent::Delta("Hi there".into())));
        assert!(matches!(rx.recv().await, Some(ChatEvent::Done(o)) if o.from_cache));
    }

    #[tokio::test]
    async fn test_stream_cache_hit_with_dropped_receiver_commits_nothing() {
        let tmp = TempDir::new().unwrap();
        let mut p = pipeline(provider_replying("cached", 1), 5.0, &tmp);
        p.send_message("q", &ChatOverrides::default()).await.unwrap();
        let before = p.context().message_count();

        let (tx, rx) = mpsc::channel(4);
        drop(rx);
        let err = p
            .send_message_stream("q", &ChatOverrides::default(), tx)
            .await
            .unwrap_err();
        assert!(matches!(err, TallyError::Cancelled));
        assert_eq!(p.context().message_count(), before);
        assert_eq!(p.tracker().calls().len(), 1);
    }

    #[tokio::test]
    async fn test_stream_budget_denial_sends_error_event() {
        let tmp = TempDir::new().unwrap();
        let mut mock = MockLLMProvider::new();
        mock.expect_name().return_const("mock");
        mock.expect_chat_stream().times(0);
        let mut p = pipeline(mock, 0.001, &tmp);
        p.tracker_mut().record_call(1000, 1000, MODEL, None);

        let (tx, mut rx) = mpsc::channel(4);
        let err = p
            .send_message_stream("hi", &ChatOverrides::default(), tx)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "budget_exceeded");
        assert!(matches!(rx.recv().await, Some(ChatEvent::Error(_))));
        assert!(p.context().is_empty());
    }

    #[tokio::test]
    async fn test_switch_mode_saves_then_clears() {
        let tmp = TempDir::new().unwrap();
        let mut p = pipeline(provider_replying("answer", 1), 5.0, &tmp);
        p.send_message("question", &ChatOverrides::default()).await.unwrap();
        let snapshot = p.snapshot_path();

        let mode = p.switch_mode("technical").unwrap();
        assert_eq!(mode, Mode::Technical);
        assert!(p.context().is_empty());
        assert_eq!(p.context().temperature(), Mode::Technical.temperature());

        let saved = ConversationContext::load(&snapshot).unwrap();
        assert_eq!(saved.message_count(), 2);
    }

    #[tokio::test]
    async fn test_switch_to_unknown_mode_changes_nothing() {
        let tmp = TempDir::new().unwrap();
        let mut p = pipeline(provider_replying("answer", 1), 5.0, &tmp);
        p.send_message("question", &ChatOverrides::default()).await.unwrap();

        let err = p.switch_mode("pirate").unwrap_err();
        assert_eq!(err.kind(), "unknown_mode");
        assert_eq!(p.context().message_count(), 2);
        assert!(!p.snapshot_path().exists());
    }

    #[tokio::test]
    async fn test_reset_clears_history_and_ledger_but_keeps_cache() {
        let tmp = TempDir::new().unwrap();
        let mut p = pipeline(provider_replying("answer", 1), 5.0, &tmp);
        p.send_message("question", &ChatOverrides::default()).await.unwrap();
        p.reset();
        assert!(p.context().is_empty());
        assert!(p.tracker().calls().is_empty());
        assert_eq!(p.cache().lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_status_and_report() {
        let tmp = TempDir::new().unwrap();
        let mut p = pipeline(provider_replying("answer", 1), 5.0, &tmp);
        p.send_message("question", &ChatOverrides::default()).await.unwrap();

        let status = p.status().await;
        assert_eq!(status.message_count, 2);
        assert_eq!(status.rounds, 1);
        assert_eq!(status.cache.entries, 1);
        assert!(status.budget.current_cost > 0.0);

        let report = p.detailed_report().await;
        assert_eq!(report.budget.total_calls, 1);
        assert!(report.pricing.iter().any(|r| r.model == MODEL));
    }

    #[tokio::test]
    async fn test_save_and_load_restore_conversation() {
        let tmp = TempDir::new().unwrap();
        let mut p = pipeline(provider_replying("answer", 1), 5.0, &tmp);
        p.send_message("question", &ChatOverrides::default()).await.unwrap();
        let path = p.save().unwrap();
        let id = p.session_id().to_string();

        p.reset();
        p.load(&path).unwrap();
        assert_eq!(p.session_id(), id);
        assert_eq!(p.context().message_count(), 2);
    }
}
