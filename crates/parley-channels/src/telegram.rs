use crate::channel::{
    CallbackQuery, ChannelEvent, ChatId, IncomingMessage, Keyboard, MessageHandle, TextFormat,
    Transport,
};
use async_trait::async_trait;
use parley_core::{ParleyError, ParleyResult};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

const DEFAULT_API_BASE: &str = "https://api.telegram.org";
const POLL_TIMEOUT_SECS: u64 = 30;

/// Telegram Bot API channel.
///
/// Uses the Bot HTTP API for sending and editing messages and long-polling
/// (`getUpdates`) for receiving them. Incoming messages and button presses
/// are forwarded through a `tokio::sync::mpsc` channel as [`ChannelEvent`]s.
pub struct TelegramChannel {
    bot_token: String,
    api_base: String,
    client: reqwest::Client,
    event_tx: mpsc::Sender<ChannelEvent>,
    event_rx: Option<mpsc::Receiver<ChannelEvent>>,
}

// ── Telegram API response types ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct TelegramResponse<T> {
    ok: bool,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    error_code: Option<u16>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct TelegramUpdate {
    update_id: i64,
    message: Option<TelegramMessagePayload>,
    callback_query: Option<TelegramCallback>,
}

#[derive(Debug, Deserialize)]
struct TelegramMessagePayload {
    message_id: i64,
    from: Option<TelegramUser>,
    chat: TelegramChat,
    text: Option<String>,
    caption: Option<String>,
    #[serde(default)]
    photo: Vec<TelegramPhotoSize>,
}

#[derive(Debug, Deserialize)]
struct TelegramPhotoSize {
    file_id: String,
    #[serde(default)]
    file_size: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct TelegramCallback {
    id: String,
    from: TelegramUser,
    message: Option<TelegramMessagePayload>,
    data: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TelegramUser {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct TelegramChat {
    id: i64,
}

#[derive(Debug, Deserialize)]
struct SentMessage {
    message_id: i64,
    chat: TelegramChat,
}

#[derive(Debug, Deserialize)]
struct TelegramFile {
    file_path: Option<String>,
}

// ── Implementation ──────────────────────────────────────────────────────────

impl TelegramChannel {
    /// Create a new `TelegramChannel`.
    ///
    /// * `bot_token` – The bot token obtained from @BotFather.
    /// * `event_buffer` – Capacity of the internal mpsc event buffer.
    pub fn new(bot_token: impl Into<String>, event_buffer: usize) -> Self {
        let (event_tx, event_rx) = mpsc::channel(event_buffer);
        Self {
            bot_token: bot_token.into(),
            api_base: DEFAULT_API_BASE.to_string(),
            client: reqwest::Client::new(),
            event_tx,
            event_rx: Some(event_rx),
        }
    }

    /// Point the channel at a different Bot API server.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    /// Take the receiving half of the event channel.
    ///
    /// This can only be called once; subsequent calls return `None`.
    pub fn take_event_receiver(&mut self) -> Option<mpsc::Receiver<ChannelEvent>> {
        self.event_rx.take()
    }

    /// Start long-polling the Telegram `getUpdates` endpoint.
    ///
    /// Runs until the event receiver is dropped. Poll failures are logged and
    /// retried after a short pause. It should be spawned onto a Tokio task.
    pub async fn poll_updates(&self) -> ParleyResult<()> {
        let mut offset: Option<i64> = None;

        loop {
            let mut body = serde_json::json!({
                "timeout": POLL_TIMEOUT_SECS,
                "allowed_updates": ["message", "callback_query"],
            });
            if let Some(off) = offset {
                body["offset"] = serde_json::json!(off);
            }

            let updates: Vec<TelegramUpdate> = match self.call("getUpdates", &body).await {
                Ok(updates) => updates,
                Err(e) => {
                    warn!(error = %e, "Telegram poll failed");
                    tokio::time::sleep(Duration::from_secs(3)).await;
                    continue;
                }
            };

            for update in updates {
                // Advance the offset so we do not receive this update again.
                offset = Some(update.update_id + 1);

                let Some(event) = to_event(update) else {
                    continue;
                };
                if self.event_tx.send(event).await.is_err() {
                    return Ok(());
                }
            }
        }
    }

    /// Acknowledge a button press, optionally with a toast.
    pub async fn answer_callback(&self, callback_id: &str, text: Option<&str>) -> ParleyResult<()> {
        let mut body = serde_json::json!({ "callback_query_id": callback_id });
        if let Some(text) = text {
            body["text"] = serde_json::json!(text);
        }
        self.call::<serde_json::Value>("answerCallbackQuery", &body)
            .await
            .map(|_| ())
    }

    /// Show "typing…" in the chat.
    pub async fn send_typing(&self, chat_id: ChatId) -> ParleyResult<()> {
        let body = serde_json::json!({ "chat_id": chat_id, "action": "typing" });
        self.call::<serde_json::Value>("sendChatAction", &body)
            .await
            .map(|_| ())
    }

    /// Download a file (e.g. a photo) by its file id.
    pub async fn download_file(&self, file_id: &str) -> ParleyResult<Vec<u8>> {
        let file: TelegramFile = self
            .call("getFile", &serde_json::json!({ "file_id": file_id }))
            .await?;
        let file_path = file
            .file_path
            .ok_or_else(|| ParleyError::Channel("getFile returned no file_path".into()))?;

        let url = format!("{}/file/bot{}/{}", self.api_base, self.bot_token, file_path);
        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| ParleyError::Channel(format!("Telegram download error: {e}")))?;
        if !resp.status().is_success() {
            return Err(ParleyError::Channel(format!(
                "Telegram download failed: {}",
                resp.status()
            )));
        }
        let bytes = resp
            .bytes()
            .await
            .map_err(|e| ParleyError::Channel(format!("Telegram download error: {e}")))?;
        Ok(bytes.to_vec())
    }

    // ── Helpers ──────────────────────────────────────────────────────────

    fn api_url(&self, method: &str) -> String {
        format!("{}/bot{}/{}", self.api_base, self.bot_token, method)
    }

    /// POST a Bot API method and unwrap its `result`.
    ///
    /// A 400 response is a [`ParleyError::TransportRejected`].
    async fn call<T: DeserializeOwned>(&self, method: &str, body: &serde_json::Value) -> ParleyResult<T> {
        let response = self
            .client
            .post(self.api_url(method))
            .timeout(Duration::from_secs(POLL_TIMEOUT_SECS + 10))
            .json(body)
            .send()
            .await
            .map_err(|e| ParleyError::Channel(format!("Telegram {method} error: {e}")))?;

        let body: TelegramResponse<T> = response
            .json()
            .await
            .map_err(|e| ParleyError::Channel(format!("Telegram parse error: {e}")))?;

        if !body.ok {
            let description = body.description.unwrap_or_default();
            debug!(method, error_code = ?body.error_code, %description, "Telegram call failed");
            return Err(match body.error_code {
                Some(400) => ParleyError::TransportRejected(description),
                _ => ParleyError::Channel(format!("Telegram {method} failed: {description}")),
            });
        }

        body.result
            .ok_or_else(|| ParleyError::Channel(format!("Telegram {method} returned no result")))
    }
}

fn to_event(update: TelegramUpdate) -> Option<ChannelEvent> {
    if let Some(cb) = update.callback_query {
        let message = cb.message?;
        return Some(ChannelEvent::Callback(CallbackQuery {
            id: cb.id,
            chat_id: message.chat.id,
            user_id: cb.from.id,
            message_id: message.message_id,
            data: cb.data.unwrap_or_default(),
        }));
    }

    let msg = update.message?;
    let user_id = msg.from.as_ref().map(|u| u.id)?;
    let photo_file_id = msg
        .photo
        .iter()
        .max_by_key(|p| p.file_size.unwrap_or(0))
        .map(|p| p.file_id.clone());
    let text = msg.text.or(msg.caption);
    if text.is_none() && photo_file_id.is_none() {
        return None;
    }

    Some(ChannelEvent::Message(IncomingMessage {
        chat_id: msg.chat.id,
        user_id,
        message_id: msg.message_id,
        text,
        photo_file_id,
    }))
}

fn message_body(text: &str, format: TextFormat, keyboard: Option<&Keyboard>) -> serde_json::Value {
    let mut body = serde_json::json!({
        "text": text,
        "disable_web_page_preview": true,
    });
    if format == TextFormat::Html {
        body["parse_mode"] = serde_json::json!("HTML");
    }
    if let Some(kb) = keyboard.filter(|kb| !kb.is_empty()) {
        body["reply_markup"] = kb.to_reply_markup();
    }
    body
}

#[async_trait]
impl Transport for TelegramChannel {
    async fn send(
        &self,
        chat_id: ChatId,
        text: &str,
        format: TextFormat,
        keyboard: Option<&Keyboard>,
    ) -> ParleyResult<MessageHandle> {
        let mut body = message_body(text, format, keyboard);
        body["chat_id"] = serde_json::json!(chat_id);
        let sent: SentMessage = self.call("sendMessage", &body).await?;
        Ok(MessageHandle {
            chat_id: sent.chat.id,
            message_id: sent.message_id,
        })
    }

    async fn edit(
        &self,
        handle: &MessageHandle,
        text: &str,
        format: TextFormat,
        keyboard: Option<&Keyboard>,
    ) -> ParleyResult<()> {
        let mut body = message_body(text, format, keyboard);
        body["chat_id"] = serde_json::json!(handle.chat_id);
        body["message_id"] = serde_json::json!(handle.message_id);
        self.call::<serde_json::Value>("editMessageText", &body)
            .await
            .map(|_| ())
    }

    async fn delete(&self, handle: &MessageHandle) -> ParleyResult<()> {
        let body = serde_json::json!({
            "chat_id": handle.chat_id,
            "message_id": handle.message_id,
        });
        self.call::<serde_json::Value>("deleteMessage", &body)
            .await
            .map(|_| ())
    }
}
