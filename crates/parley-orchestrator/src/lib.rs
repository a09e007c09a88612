//! Multi-model fan-out and debates.
//!
//! # Main types
//!
//! - [`MultiModelOrchestrator`] — Concurrent, fault-isolated calls to every provider plus the debate engine.
//! - [`Aggregate`] — A fan-out rendered into provider sections with signatures and a timing footer.
//! - [`DebateSession`] — Per-user debate state kept in a TTL session store.

/// Debate prompts.
pub mod debate;
/// Fan-out and debate engine.
pub mod engine;
/// Rendering for the chat transport.
pub mod render;
/// Answers, debate sessions and states.
pub mod types;

pub use engine::MultiModelOrchestrator;
pub use render::{deliver_aggregate, render_critiques, timing_footer, Aggregate, SECTION_SEPARATOR};
pub use types::{DebateSession, DebateState, DebateSummary, ProviderAnswer};
