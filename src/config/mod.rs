//! Configuration for TallyChat.
//!
//! Built once at startup and passed by reference into each component
//! constructor. Load order: defaults → `~/.tallychat/config.json` →
//! environment overrides (`ANTHROPIC_API_KEY`, `TALLYCHAT_*`).

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::budget::pricing::{ModelPrice, DEFAULT_MODEL};
use crate::error::{Result, TallyError};

/// Anthropic Messages API base URL.
pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub provider: ProviderConfig,
    pub chat: ChatConfig,
    pub budget: BudgetConfig,
    pub cache: CacheConfig,
    pub storage: StorageConfig,
    pub pricing: PricingConfig,
    pub web: WebConfig,
}

/// Remote model credentials and transport settings.
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub api_key: Option<String>,
    pub base_url: String,
    /// Request timeout. A timeout surfaces as an ordinary provider error.
    pub timeout_secs: u64,
}

impl std::fmt::Debug for ProviderConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderConfig")
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: DEFAULT_BASE_URL.to_string(),
            timeout_secs: 120,
        }
    }
}

/// Default conversation parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub model: String,
    pub max_tokens: u32,
    pub temperature: f64,
    pub system_prompt: Option<String>,
    /// Preset applied at session start, if any.
    pub mode: Option<String>,
    /// Stream replies in the interactive CLI.
    pub stream: bool,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            model: DEFAULT_MODEL.to_string(),
            max_tokens: 1024,
            temperature: 0.7,
            system_prompt: None,
            mode: None,
            stream: true,
        }
    }
}

/// Spending limit for one session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BudgetConfig {
    /// Limit in USD.
    pub limit_usd: f64,
    /// Fraction of the limit at which the session is "near limit".
    pub warn_fraction: f64,
    /// How many recent call records the report includes.
    pub recent_window: usize,
}

impl Default for BudgetConfig {
    fn default() -> Self {
        Self {
            limit_usd: 5.0,
            warn_fraction: 0.8,
            recent_window: 10,
        }
    }
}

/// Response cache settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
    pub max_entries: usize,
    /// Write the cache to disk after every mutation.
    pub persist: bool,
    /// Snapshot path; defaults to `<data_dir>/cache/responses.json`.
    pub path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 3600,
            max_entries: 500,
            persist: true,
            path: None,
        }
    }
}

/// Where snapshots and exports are written.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Defaults to `~/.tallychat`.
    pub data_dir: Option<PathBuf>,
}

/// Price table adjustments.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PricingConfig {
    /// Model whose row prices unknown models.
    pub default_model: String,
    /// Extra or replacement rows keyed by model name.
    pub overrides: HashMap<String, ModelPrice>,
}

impl Default for PricingConfig {
    fn default() -> Self {
        Self {
            default_model: DEFAULT_MODEL.to_string(),
            overrides: HashMap::new(),
        }
    }
}

/// HTTP server settings (used by `tallychat serve`).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebConfig {
    pub bind: String,
    pub port: u16,
    /// Directory served at `/` for the browser client.
    pub static_dir: Option<PathBuf>,
    /// Live sessions kept in memory; the least recently used is dropped
    /// (after saving) when a new one would exceed this.
    pub max_sessions: usize,
}

impl Default for WebConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8787,
            static_dir: None,
            max_sessions: 256,
        }
    }
}

impl Config {
    /// `~/.tallychat/config.json`.
    pub fn path() -> PathBuf {
        default_home().join("config.json")
    }

    /// Load from the default path, then apply environment overrides.
    pub fn load() -> Result<Self> {
        Self::load_with(&Self::path(), |name| std::env::var(name).ok())
    }

    /// Load from `path`, then apply overrides read through `lookup`.
    pub fn load_with<F>(path: &Path, lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::load_from_path(path)?;
        config.apply_env_overrides(lookup);
        Ok(config)
    }

    /// Load from `path`. A missing file yields defaults.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        match std::fs::read_to_string(path) {
            Ok(data) => serde_json::from_str(&data).map_err(|e| {
                TallyError::Config(format!("invalid config file {}: {}", path.display(), e))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No config file, using defaults");
                Ok(Self::default())
            }
            Err(e) => Err(TallyError::Config(format!(
                "failed to read config file {}: {}",
                path.display(),
                e
            ))),
        }
    }

    /// Apply environment overrides using `lookup` to read variables.
    ///
    /// Unparseable sampling, budget and capacity values are replaced with a
    /// value `validate()` rejects, so a typo never silently runs with defaults.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(key) = lookup("ANTHROPIC_API_KEY").filter(|k| !k.trim().is_empty()) {
            self.provider.api_key = Some(key.trim().to_string());
        }
        if let Some(url) = lookup("TALLYCHAT_BASE_URL") {
            self.provider.base_url = url;
        }
        if let Some(model) = lookup("TALLYCHAT_MODEL") {
            self.chat.model = model;
        }
        if let Some(v) = lookup("TALLYCHAT_MAX_TOKENS") {
            self.chat.max_tokens = v.trim().parse().unwrap_or(0);
        }
        if let Some(v) = lookup("TALLYCHAT_TEMPERATURE") {
            self.chat.temperature = v.trim().parse().unwrap_or(f64::NAN);
        }
        if let Some(v) = lookup("TALLYCHAT_BUDGET_LIMIT") {
            self.budget.limit_usd = v.trim().parse().unwrap_or(f64::NAN);
        }
        if let Some(v) = lookup("TALLYCHAT_CACHE_ENABLED") {
            self.cache.enabled = matches!(v.trim(), "1" | "true" | "yes" | "on");
        }
        if let Some(v) = lookup("TALLYCHAT_CACHE_TTL_SECS") {
            if let Ok(ttl) = v.trim().parse() {
                self.cache.ttl_secs = ttl;
            }
        }
        if let Some(v) = lookup("TALLYCHAT_CACHE_MAX_ENTRIES") {
            self.cache.max_entries = v.trim().parse().unwrap_or(0);
        }
        if let Some(dir) = lookup("TALLYCHAT_DATA_DIR") {
            self.storage.data_dir = Some(PathBuf::from(dir));
        }
    }

    /// Reject out-of-range parameters. Credentials are checked separately by
    /// [`Config::require_api_key`] since offline commands do not need them.
    pub fn validate(&self) -> Result<()> {
        let t = self.chat.temperature;
        if !(0.0..=1.0).contains(&t) {
            return Err(TallyError::Config(format!(
                "chat.temperature must be within [0, 1], got {}",
                t
            )));
        }
        if self.chat.max_tokens == 0 {
            return Err(TallyError::Config(
                "chat.max_tokens must be greater than 0".into(),
            ));
        }
        if self.chat.model.trim().is_empty() {
            return Err(TallyError::Config("chat.model must not be empty".into()));
        }
        if self.budget.limit_usd.is_nan() || self.budget.limit_usd <= 0.0 {
            return Err(TallyError::Config(format!(
                "budget.limit_usd must be greater than 0, got {}",
                self.budget.limit_usd
            )));
        }
        let w = self.budget.warn_fraction;
        if w.is_nan() || w <= 0.0 || w > 1.0 {
            return Err(TallyError::Config(format!(
                "budget.warn_fraction must be within (0, 1], got {}",
                w
            )));
        }
        if self.cache.max_entries == 0 {
            return Err(TallyError::Config(
                "cache.max_entries must be greater than 0".into(),
            ));
        }
        if self.web.max_sessions == 0 {
            return Err(TallyError::Config(
                "web.max_sessions must be greater than 0".into(),
            ));
        }
        if let Some(mode) = &self.chat.mode {
            mode.parse::<crate::session::Mode>()
                .map_err(|e| TallyError::Config(e.to_string()))?;
        }
        Ok(())
    }

    /// The API key, or a config error naming where to set it.
    pub fn require_api_key(&self) -> Result<&str> {
        self.provider
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                TallyError::Config(
                    "no API key configured; set ANTHROPIC_API_KEY or provider.api_key in ~/.tallychat/config.json"
                        .into(),
                )
            })
    }

    /// Root directory for snapshots and exports.
    pub fn data_dir(&self) -> PathBuf {
        self.storage.data_dir.clone().unwrap_or_else(default_home)
    }

    /// Cache snapshot path, or `None` when persistence is off.
    pub fn cache_path(&self) -> Option<PathBuf> {
        if !self.cache.persist {
            return None;
        }
        Some(
            self.cache
                .path
                .clone()
                .unwrap_or_else(|| self.data_dir().join("cache").join("responses.json")),
        )
    }
}

fn default_home() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".tallychat")
}
