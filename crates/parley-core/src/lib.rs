//! Core types and error definitions for Parley.
//!
//! This crate provides the foundational types shared across all Parley crates:
//! error handling, conversation turns and summaries, backend usage records and
//! streaming events.
//!
//! # Main types
//!
//! - [`ParleyError`] — Unified error enum for all Parley subsystems.
//! - [`ParleyResult`] — Convenience alias for `Result<T, ParleyError>`.
//! - [`ProviderErrorKind`] — Rate-limited / transient / fatal classification.
//! - [`ChatMessage`] — A message as sent to a model backend.
//! - [`ConversationTurn`] — A stored user or assistant turn.
//! - [`ContextSummary`] — A summary replacing a prefix of turns.
//! - [`Generation`] — Text plus usage returned by a single backend call.
//! - [`StreamEvent`] — Incremental output of a streaming call.

/// Error types.
pub mod error;
/// Turn, summary and chat message types.
pub mod message;
/// Streaming event types.
pub mod stream;
/// Usage accounting types.
pub mod usage;

pub use error::{ParleyError, ParleyResult, ProviderErrorKind};
pub use message::{ChatMessage, ContextSummary, ConversationTurn, NewSummary, NewTurn, Role};
pub use stream::StreamEvent;
pub use usage::{Generation, Usage};

/// Telegram user id; conversations are owned per user.
pub type UserId = i64;

/// Identifier of a stored [`ConversationTurn`].
pub type TurnId = i64;

/// Truncate `text` to at most `max_chars` characters, never splitting a
/// UTF-8 sequence.
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
