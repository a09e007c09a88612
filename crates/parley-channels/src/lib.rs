//! Messaging transport and live response delivery.
//!
//! # Main types
//!
//! - [`Transport`] — Size-constrained send / edit / delete surface.
//! - [`TelegramChannel`] — Telegram Bot API transport with long-polling.
//! - [`StreamingDelivery`] — Placeholder, throttled edits and final formatting.
//! - [`TelegraphPublisher`] — Publishes long responses as pages.

/// Transport trait and message types.
pub mod channel;
/// Markdown to Telegram HTML.
pub mod format;
/// Long-response publishing.
pub mod publish;
/// Streaming delivery state machine.
pub mod streaming;
/// Telegram channel integration.
pub mod telegram;

pub use channel::{
    Button, ButtonAction, CallbackQuery, ChannelEvent, ChatId, IncomingMessage, Keyboard,
    MessageHandle, TextFormat, Transport, MAX_MESSAGE_CHARS,
};
pub use format::{escape_html, md_to_html};
pub use publish::{Publisher, TelegraphPublisher};
pub use streaming::{
    split_text, DeliveryConfig, DeliveryOutcome, DeliveryRequest, DeliveryState, Finalized,
    Signature, StreamSession, StreamingDelivery,
};
pub use telegram::TelegramChannel;
