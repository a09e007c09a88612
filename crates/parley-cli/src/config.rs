//! `parley.toml` plus environment overrides for secrets.

use anyhow::{bail, Context};
use parley_agent::{LlmProvider, ModelConfig};
use parley_channels::DeliveryConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a helpful assistant. Answer accurately and \
to the point. Use Markdown formatting where it helps readability.";

#[derive(Debug, Deserialize)]
pub struct ParleyConfig {
    #[serde(default)]
    pub telegram: TelegramConfig,
    #[serde(default)]
    pub providers: Vec<ModelConfig>,
    #[serde(default = "default_provider")]
    pub default_provider: String,
    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,
    #[serde(default)]
    pub streaming: StreamingConfig,
    #[serde(default)]
    pub context: ContextConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub publish: PublishConfig,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Deserialize)]
pub struct TelegramConfig {
    #[serde(default)]
    pub bot_token: String,
    /// Bot API server, e.g. a local `telegram-bot-api` instance.
    pub api_base: Option<String>,
    /// Only these users may talk to the bot. Empty allows everyone.
    #[serde(default)]
    pub allowed_users: Vec<i64>,
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            bot_token: String::new(),
            api_base: None,
            allowed_users: Vec::new(),
            event_buffer: default_event_buffer(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct StreamingConfig {
    #[serde(default = "default_update_interval_ms")]
    pub update_interval_ms: u64,
    #[serde(default = "default_inline_threshold")]
    pub inline_threshold: usize,
    #[serde(default = "default_chunk_chars")]
    pub chunk_chars: usize,
    #[serde(default = "default_preview_chars")]
    pub preview_chars: usize,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            update_interval_ms: default_update_interval_ms(),
            inline_threshold: default_inline_threshold(),
            chunk_chars: default_chunk_chars(),
            preview_chars: default_preview_chars(),
        }
    }
}

impl StreamingConfig {
    pub fn delivery_config(&self) -> DeliveryConfig {
        DeliveryConfig {
            update_interval: Duration::from_millis(self.update_interval_ms),
            inline_threshold: self.inline_threshold,
            chunk_chars: self.chunk_chars,
            preview_chars: self.preview_chars,
            ..DeliveryConfig::default()
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct ContextConfig {
    /// Recent turns sent with every request.
    #[serde(default = "default_window_size")]
    pub window_size: usize,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            window_size: default_window_size(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct SessionsConfig {
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    #[serde(default = "default_sweep_secs")]
    pub sweep_interval_secs: u64,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            ttl_secs: default_ttl_secs(),
            sweep_interval_secs: default_sweep_secs(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PublishConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    pub api_base: Option<String>,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            api_base: None,
        }
    }
}

fn default_provider() -> String {
    "claude".to_string()
}
fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}
fn default_data_dir() -> PathBuf {
    PathBuf::from("./data")
}
fn default_event_buffer() -> usize {
    100
}
fn default_update_interval_ms() -> u64 {
    1000
}
fn default_inline_threshold() -> usize {
    3800
}
fn default_chunk_chars() -> usize {
    3000
}
fn default_preview_chars() -> usize {
    800
}
fn default_window_size() -> usize {
    20
}
fn default_ttl_secs() -> u64 {
    3600
}
fn default_sweep_secs() -> u64 {
    300
}
fn default_true() -> bool {
    true
}

/// Environment variable holding the API key for a provider.
pub fn key_env(provider: LlmProvider) -> &'static str {
    match provider {
        LlmProvider::Claude => "ANTHROPIC_API_KEY",
        LlmProvider::OpenAi => "OPENAI_API_KEY",
        LlmProvider::Gemini => "GOOGLE_AI_API_KEY",
    }
}

/// Model used when a provider is enabled only through its API key.
fn default_model(provider: LlmProvider) -> &'static str {
    match provider {
        LlmProvider::Claude => "claude-sonnet-4-20250514",
        LlmProvider::OpenAi => "chatgpt-4o-latest",
        LlmProvider::Gemini => "gemini-2.0-flash",
    }
}

impl ParleyConfig {
    /// Read `path` (missing file means defaults) and apply the process
    /// environment.
    pub async fn load(path: &Path) -> anyhow::Result<Self> {
        let text = if tokio::fs::try_exists(path).await.unwrap_or(false) {
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read config file '{}'", path.display()))?
        } else {
            warn!(path = %path.display(), "Config file not found, using defaults and environment");
            String::new()
        };
        Self::parse(&text, |key| std::env::var(key).ok())
    }

    pub fn parse(text: &str, env: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let mut config: Self = toml::from_str(text).context("Invalid config")?;
        config.apply_env(&env);
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self, env: &impl Fn(&str) -> Option<String>) {
        if let Some(token) = env("TELEGRAM_BOT_TOKEN").filter(|t| !t.is_empty()) {
            self.telegram.bot_token = token;
        }

        if self.providers.is_empty() {
            for provider in [LlmProvider::Claude, LlmProvider::OpenAi, LlmProvider::Gemini] {
                if env(key_env(provider)).is_some_and(|k| !k.is_empty()) {
                    self.providers
                        .push(ModelConfig::new(provider, default_model(provider), ""));
                }
            }
        }

        for provider in &mut self.providers {
            if let Some(key) = env(key_env(provider.provider)).filter(|k| !k.is_empty()) {
                provider.api_key = key;
            }
        }
    }

    fn validate(&mut self) -> anyhow::Result<()> {
        self.providers.retain(|p| {
            let has_key = !p.api_key.is_empty();
            if !has_key {
                warn!(provider = p.provider.id(), "No API key, provider disabled");
            }
            has_key
        });
        if self.providers.is_empty() {
            bail!(
                "No AI providers configured; add [[providers]] or set {}, {} or {}",
                key_env(LlmProvider::Claude),
                key_env(LlmProvider::OpenAi),
                key_env(LlmProvider::Gemini)
            );
        }

        let known = self
            .providers
            .iter()
            .any(|p| p.provider.id() == self.default_provider);
        if !known {
            let fallback = self.providers[0].provider.id().to_string();
            warn!(configured = %self.default_provider, using = %fallback, "Default provider not available");
            self.default_provider = fallback;
        }
        info!(
            providers = self.providers.len(),
            default = %self.default_provider,
            "Configuration loaded"
        );
        Ok(())
    }

    pub fn database_path(&self) -> PathBuf {
        self.data_dir.join("parley.db")
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.sessions.ttl_secs)
    }

    pub fn is_allowed(&self, user_id: i64) -> bool {
        self.telegram.allowed_users.is_empty() || self.telegram.allowed_users.contains(&user_id)
    }
}
