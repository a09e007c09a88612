//! Model backends and everything that decides which one to call.
//!
//! # Main types
//!
//! - [`LlmBackend`] — Provider-neutral generate / stream / image interface.
//! - [`FallbackPolicy`] — Ordered candidate walk over rate limits and transient failures.
//! - [`ProviderRouter`] — Per-user provider preference, labels and display names.
//! - [`ContextAssembler`] — Summary-plus-window context building and compaction.
//! - [`UsageLedger`] — Per-provider call and token counters.

/// Concrete provider backends.
pub mod backends;
/// Provider and model configuration.
pub mod config;
/// Context assembly and compaction.
pub mod context;
/// Fallback across candidate models.
pub mod failover;
/// Provider routing and labels.
pub mod router;
/// Usage accounting.
pub mod usage;

pub use backends::{build_backend, GenerationStream, LlmBackend};
pub use config::{LlmProvider, ModelConfig};
pub use context::{Compaction, ContextAssembler, ContextStats};
pub use failover::FallbackPolicy;
pub use router::{model_label, ProviderEntry, ProviderRouter, ALL_PROVIDERS};
pub use usage::{ProviderUsage, UsageLedger};
