use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// A convenience `Result` alias using [`ParleyError`].
pub type ParleyResult<T> = Result<T, ParleyError>;

/// How a provider failure should be handled by the fallback policy.
///
/// Every backend maps its own failure modes (HTTP status codes, SDK error
/// strings, broken streams) into one of these three kinds before any retry
/// decision is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderErrorKind {
    /// Quota or rate limit hit; the next candidate may succeed.
    RateLimited,
    /// Network hiccup, 5xx or broken stream; a one-shot retry may succeed.
    Transient,
    /// Anything else. Never masked by fallback.
    Fatal,
}

impl fmt::Display for ProviderErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ProviderErrorKind::RateLimited => "rate limited",
            ProviderErrorKind::Transient => "transient failure",
            ProviderErrorKind::Fatal => "fatal error",
        };
        f.write_str(s)
    }
}

/// Top-level error type for Parley.
///
/// Each variant corresponds to a subsystem that can produce errors.
#[derive(Debug, Error)]
pub enum ParleyError {
    /// A classified failure reported by a model backend.
    #[error("{provider} {kind}: {detail}")]
    Provider {
        /// Provider id (`claude`, `gpt`, `gemini`, ...).
        provider: String,
        /// Classification used by the fallback policy.
        kind: ProviderErrorKind,
        /// Backend-specific detail, for logs and truncated diagnostics.
        detail: String,
    },

    /// An outbound HTTP request that failed before a provider could be blamed.
    #[error("HTTP error: {0}")]
    Http(String),

    /// An error related to conversation, summary or preference persistence.
    #[error("Session error: {0}")]
    Session(String),

    /// An error in configuration parsing or validation.
    #[error("Config error: {0}")]
    Config(String),

    /// An error from the messaging channel (network, parsing).
    #[error("Channel error: {0}")]
    Channel(String),

    /// The transport refused a payload (invalid markup, oversized, unchanged).
    #[error("Transport rejected: {0}")]
    TransportRejected(String),

    /// An error from the streaming delivery state machine.
    #[error("Delivery error: {0}")]
    Delivery(String),

    /// An error from the multi-model orchestrator.
    #[error("Orchestrator error: {0}")]
    Orchestrator(String),

    /// A JSON serialization or deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A standard I/O error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ParleyError {
    /// Build a [`ParleyError::Provider`] with [`ProviderErrorKind::RateLimited`].
    pub fn rate_limited(provider: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::provider(provider, ProviderErrorKind::RateLimited, detail)
    }

    /// Build a [`ParleyError::Provider`] with [`ProviderErrorKind::Transient`].
    pub fn transient(provider: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::provider(provider, ProviderErrorKind::Transient, detail)
    }

    /// Build a [`ParleyError::Provider`] with [`ProviderErrorKind::Fatal`].
    pub fn fatal(provider: impl Into<String>, detail: impl Into<String>) -> Self {
        Self::provider(provider, ProviderErrorKind::Fatal, detail)
    }

    /// Build a [`ParleyError::Provider`] of the given kind.
    pub fn provider(
        provider: impl Into<String>,
        kind: ProviderErrorKind,
        detail: impl Into<String>,
    ) -> Self {
        Self::Provider {
            provider: provider.into(),
            kind,
            detail: detail.into(),
        }
    }

    /// The provider classification, if this is a provider error.
    pub fn provider_kind(&self) -> Option<ProviderErrorKind> {
        match self {
            ParleyError::Provider { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Whether the transport refused the payload.
    pub fn is_transport_rejection(&self) -> bool {
        matches!(self, ParleyError::TransportRejected(_))
    }
}
