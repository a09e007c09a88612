use crate::backends::LlmBackend;
use crate::config::{LlmProvider, ModelConfig};
use crate::failover::FallbackPolicy;
use parley_core::{ParleyError, ParleyResult, UserId};
use parley_session::{PreferenceStore, SessionStore};
use std::sync::Arc;
use tracing::{info, warn};

/// Pseudo-provider id meaning "ask every configured provider".
pub const ALL_PROVIDERS: &str = "all";

/// A configured provider as seen by the rest of the system.
#[derive(Clone)]
pub struct ProviderEntry {
    /// Provider id (`claude`, `gpt`, `gemini`).
    pub id: String,
    /// Display name (`Claude`, `GPT`, `Gemini`).
    pub display: String,
    /// Configured primary model id.
    pub model_id: String,
    /// Backend, usually a [`FallbackPolicy`] over the model chain.
    pub backend: Arc<dyn LlmBackend>,
}

impl ProviderEntry {
    pub fn new(
        provider: LlmProvider,
        model_id: impl Into<String>,
        backend: Arc<dyn LlmBackend>,
    ) -> Self {
        Self {
            id: provider.id().to_string(),
            display: provider.display_name().to_string(),
            model_id: model_id.into(),
            backend,
        }
    }

    /// Build the entry for a config, wrapping its model chain in a fallback policy.
    pub fn from_config(config: &ModelConfig) -> ParleyResult<Self> {
        let policy = FallbackPolicy::for_config(config)?;
        Ok(Self::new(config.provider, &config.model_id, Arc::new(policy)))
    }

    /// Signature label such as `Claude Opus 4.6`.
    pub fn label(&self) -> String {
        model_label(&self.model_id, &self.display)
    }
}

/// Resolves and persists each user's active provider.
///
/// The preference has two tiers: a volatile [`SessionStore`] that is
/// authoritative while an entry lives, and a durable [`PreferenceStore`]
/// consulted on a cache miss. Durable-store failures are logged and never
/// surface to the user.
pub struct ProviderRouter {
    providers: Vec<ProviderEntry>,
    default_provider: String,
    cache: Arc<SessionStore<String>>,
    store: Arc<dyn PreferenceStore>,
}

impl ProviderRouter {
    pub fn new(
        providers: Vec<ProviderEntry>,
        default_provider: impl Into<String>,
        cache: Arc<SessionStore<String>>,
        store: Arc<dyn PreferenceStore>,
    ) -> Self {
        let default_provider = default_provider.into();
        for p in &providers {
            info!(provider = %p.id, model = %p.model_id, "Provider initialized");
        }
        Self {
            providers,
            default_provider,
            cache,
            store,
        }
    }

    pub fn default_provider(&self) -> &str {
        &self.default_provider
    }

    /// Whether `provider_id` names a configured provider or [`ALL_PROVIDERS`].
    pub fn is_selectable(&self, provider_id: &str) -> bool {
        provider_id == ALL_PROVIDERS || self.entry(provider_id).is_some()
    }

    /// The user's active provider id.
    pub async fn load_preference(&self, user_id: UserId) -> String {
        if let Some(cached) = self.cache.get(user_id) {
            return cached;
        }

        match self.store.get_preference(user_id).await {
            Ok(Some(stored)) if self.is_selectable(&stored) => {
                info!(user_id, provider = %stored, "Loaded provider preference");
                self.cache.insert(user_id, stored.clone());
                return stored;
            }
            Ok(_) => {}
            Err(e) => warn!(user_id, error = %e, "Failed to load provider preference"),
        }
        self.default_provider.clone()
    }

    /// Record the user's choice: cache first, then the durable store.
    pub async fn save_preference(&self, user_id: UserId, provider_id: &str) {
        self.cache.insert(user_id, provider_id.to_string());
        if let Err(e) = self.store.set_preference(user_id, provider_id).await {
            warn!(user_id, provider = provider_id, error = %e, "Failed to save provider preference");
        }
    }

    pub fn entry(&self, provider_id: &str) -> Option<&ProviderEntry> {
        self.providers.iter().find(|p| p.id == provider_id)
    }

    /// Resolve a provider; unknown ids fall back to the default, then to any
    /// configured provider.
    pub fn resolve(&self, provider_id: &str) -> ParleyResult<&ProviderEntry> {
        self.entry(provider_id)
            .or_else(|| self.entry(&self.default_provider))
            .or_else(|| self.providers.first())
            .ok_or_else(|| ParleyError::Config("No AI providers configured".into()))
    }

    pub fn adapter(&self, provider_id: &str) -> ParleyResult<Arc<dyn LlmBackend>> {
        self.resolve(provider_id).map(|p| Arc::clone(&p.backend))
    }

    /// `"<Display> (<model id>)"`, or the raw id when unknown.
    pub fn display_name(&self, provider_id: &str) -> String {
        match self.entry(provider_id) {
            Some(p) => format!("{} ({})", p.display, p.model_id),
            None => provider_id.to_string(),
        }
    }

    /// Signature label for a provider, or the raw id when unknown.
    pub fn label_for(&self, provider_id: &str) -> String {
        self.entry(provider_id)
            .map_or_else(|| provider_id.to_string(), ProviderEntry::label)
    }

    /// Configured provider ids in configuration order.
    pub fn available_providers(&self) -> Vec<&str> {
        self.providers.iter().map(|p| p.id.as_str()).collect()
    }

    pub fn providers(&self) -> &[ProviderEntry] {
        &self.providers
    }
}

/// Human label for a raw model id, e.g. `claude-opus-4-6` → `Claude Opus 4.6`.
///
/// Strips the provider-name prefix and a trailing 8-digit date, joins
/// consecutive numeric tokens with dots and drops `latest`/`preview`.
pub fn model_label(raw_model_id: &str, provider_name: &str) -> String {
    let lower_id = raw_model_id.to_lowercase();
    let lower_name = provider_name.to_lowercase();
    let tail = if lower_id.starts_with(&lower_name) {
        raw_model_id.get(lower_name.len()..).unwrap_or(raw_model_id)
    } else {
        raw_model_id
    };
    let mut tail = tail.trim_matches('-');

    if let Some((head, date)) = tail.rsplit_once('-') {
        if date.len() == 8 && date.bytes().all(|b| b.is_ascii_digit()) {
            tail = head;
        }
    }

    let mut parts: Vec<String> = Vec::new();
    let mut numbers: Vec<&str> = Vec::new();
    let is_number = |t: &str| !t.is_empty() && t.bytes().all(|b| b.is_ascii_digit());

    for token in tail.split('-').filter(|t| !tail.is_empty() || !t.is_empty()) {
        if is_number(token) {
            numbers.push(token);
            continue;
        }
        if !numbers.is_empty() {
            parts.push(numbers.join("."));
            numbers.clear();
        }
        if token != "latest" && token != "preview" {
            parts.push(capitalize(token));
        }
    }
    if !numbers.is_empty() {
        parts.push(numbers.join("."));
    }

    let suffix = if parts.is_empty() {
        raw_model_id.to_string()
    } else {
        parts.join(" ")
    };
    format!("{provider_name} {suffix}")
}

fn capitalize(token: &str) -> String {
    let mut chars = token.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}
