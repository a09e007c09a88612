use async_trait::async_trait;
use parley_core::{ParleyResult, UserId};
use serde::{Deserialize, Serialize};

/// Telegram chat id.
pub type ChatId = i64;

/// Largest payload the transport accepts, in characters.
pub const MAX_MESSAGE_CHARS: usize = 4096;

/// Characters kept free at the end of an in-progress edit.
pub const RESERVED_SUFFIX_CHARS: usize = 5;

/// How the transport should interpret message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextFormat {
    Plain,
    Html,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ButtonAction {
    /// Callback data delivered back to the bot.
    Callback(String),
    /// External link.
    Url(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Button {
    pub text: String,
    pub action: ButtonAction,
}

impl Button {
    pub fn callback(text: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            action: ButtonAction::Callback(data.into()),
        }
    }

    pub fn url(text: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            action: ButtonAction::Url(url.into()),
        }
    }
}

/// Inline keyboard attached to a message, as rows of buttons.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Keyboard {
    pub rows: Vec<Vec<Button>>,
}

impl Keyboard {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn row(mut self, row: Vec<Button>) -> Self {
        self.push_row(row);
        self
    }

    pub fn push_row(&mut self, row: Vec<Button>) {
        if !row.is_empty() {
            self.rows.push(row);
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Telegram `InlineKeyboardMarkup` JSON.
    pub fn to_reply_markup(&self) -> serde_json::Value {
        let rows: Vec<Vec<serde_json::Value>> = self
            .rows
            .iter()
            .map(|row| {
                row.iter()
                    .map(|b| match &b.action {
                        ButtonAction::Callback(data) => {
                            serde_json::json!({ "text": b.text, "callback_data": data })
                        }
                        ButtonAction::Url(url) => serde_json::json!({ "text": b.text, "url": url }),
                    })
                    .collect()
            })
            .collect();
        serde_json::json!({ "inline_keyboard": rows })
    }
}

/// A message the transport has accepted; needed to edit or delete it later.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MessageHandle {
    pub chat_id: ChatId,
    pub message_id: i64,
}

/// Size-constrained messaging transport.
///
/// `edit` fails with [`parley_core::ParleyError::TransportRejected`] when the
/// transport refuses the payload (bad markup, unchanged text, too long).
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        chat_id: ChatId,
        text: &str,
        format: TextFormat,
        keyboard: Option<&Keyboard>,
    ) -> ParleyResult<MessageHandle>;

    async fn edit(
        &self,
        handle: &MessageHandle,
        text: &str,
        format: TextFormat,
        keyboard: Option<&Keyboard>,
    ) -> ParleyResult<()>;

    async fn delete(&self, handle: &MessageHandle) -> ParleyResult<()>;
}

/// An inbound event from the messaging platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A text message or a photo with an optional caption.
    Message(IncomingMessage),
    /// An inline keyboard button press.
    Callback(CallbackQuery),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IncomingMessage {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub message_id: i64,
    pub text: Option<String>,
    /// File id of the largest photo size, if the message carries a photo.
    pub photo_file_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallbackQuery {
    pub id: String,
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub message_id: i64,
    pub data: String,
}
