//! Live delivery of a streamed generation into a chat message.
//!
//! A placeholder is sent first, edited with throttled snapshots of the
//! growing text while fragments arrive, and finally replaced by the
//! formatted response. Long responses are published as a page (preview plus
//! link) or split across several messages.

use crate::channel::{
    Button, ChatId, Keyboard, MessageHandle, TextFormat, Transport, MAX_MESSAGE_CHARS,
    RESERVED_SUFFIX_CHARS,
};
use crate::format::md_to_html;
use crate::publish::Publisher;
use parley_agent::GenerationStream;
use parley_core::{truncate_chars, Generation, ParleyError, ParleyResult, StreamEvent};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Appended to in-progress snapshots.
pub const CURSOR: &str = " \u{258c}";

const MAX_ERROR_DETAIL_CHARS: usize = 500;

const PREVIEW_SUFFIX: &str = "\n...";

/// Tunables for [`StreamingDelivery`].
#[derive(Debug, Clone)]
pub struct DeliveryConfig {
    /// Minimum time between two in-progress edits.
    pub update_interval: Duration,
    pub max_message_chars: usize,
    pub reserved_suffix_chars: usize,
    /// Responses up to this size are delivered as a single message.
    pub inline_threshold: usize,
    /// Chunk size when a response is split across messages.
    pub chunk_chars: usize,
    /// Size of the preview shown next to a published page link.
    pub preview_chars: usize,
    pub read_full_label: String,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            update_interval: Duration::from_secs(1),
            max_message_chars: MAX_MESSAGE_CHARS,
            reserved_suffix_chars: RESERVED_SUFFIX_CHARS,
            inline_threshold: 3800,
            chunk_chars: 3000,
            preview_chars: 800,
            read_full_label: "Read full".into(),
        }
    }
}

/// Footer identifying the model that produced a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub label: String,
    /// `dd.mm.yyyy`
    pub date: String,
    pub balance: Option<String>,
}

impl Signature {
    pub fn today(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            date: chrono::Local::now().format("%d.%m.%Y").to_string(),
            balance: None,
        }
    }

    pub fn with_balance(mut self, balance: impl Into<String>) -> Self {
        self.balance = Some(balance.into());
        self
    }

    fn body(&self) -> String {
        let mut parts = vec![self.label.as_str(), self.date.as_str()];
        if let Some(balance) = self.balance.as_deref().filter(|b| !b.is_empty()) {
            parts.push(balance);
        }
        format!("\u{2014} {}", parts.join(" | "))
    }

    pub fn html(&self) -> String {
        format!("\n\n<blockquote>{}</blockquote>", self.body())
    }

    pub fn plain(&self) -> String {
        format!("\n\n{}", self.body())
    }

    /// Page title for published responses.
    pub fn title(&self) -> String {
        format!("{} | {}", self.label, self.date)
    }
}

/// Split `text` into chunks of at most `max_chars` characters.
///
/// Prefers breaking at the last newline inside the window unless that
/// newline lies in the first half, in which case the chunk is cut hard.
/// Newlines at the start of the remainder are dropped.
pub fn split_text(text: &str, max_chars: usize) -> Vec<String> {
    let max_chars = max_chars.max(1);
    let mut chunks = Vec::new();
    let mut rest = text;

    while !rest.is_empty() {
        let hard = match rest.char_indices().nth(max_chars) {
            Some((idx, _)) => idx,
            None => {
                chunks.push(rest.to_string());
                break;
            }
        };
        let window = &rest[..hard];
        let split_at = match window.rfind('\n') {
            Some(nl) if nl > 0 && window[..nl].chars().count() >= max_chars / 2 => nl,
            _ => hard,
        };
        chunks.push(rest[..split_at].to_string());
        rest = rest[split_at..].trim_start_matches('\n');
    }
    chunks
}

/// Head of `text` cut back to the last newline, plus `"\n..."`. The result
/// never exceeds `max_chars`.
pub fn preview(text: &str, max_chars: usize) -> String {
    let head = truncate_chars(text, max_chars.saturating_sub(PREVIEW_SUFFIX.chars().count()));
    let head = head.rfind('\n').map_or(head, |nl| &head[..nl]);
    format!("{head}{PREVIEW_SUFFIX}")
}

/// Accumulated text plus the edit throttle for one stream.
#[derive(Debug)]
pub struct StreamBuffer {
    text: String,
    last_edit: Instant,
    last_sent: String,
}

impl StreamBuffer {
    pub fn new() -> Self {
        Self {
            text: String::new(),
            last_edit: Instant::now(),
            last_sent: String::new(),
        }
    }

    pub fn push(&mut self, fragment: &str) {
        self.text.push_str(fragment);
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    pub fn char_len(&self) -> usize {
        self.text.chars().count()
    }

    /// Snapshot to show while streaming: truncated to `limit` and suffixed
    /// with the cursor.
    pub fn render(&self, limit: usize) -> String {
        format!("{}{CURSOR}", truncate_chars(&self.text, limit))
    }

    /// The snapshot to send now, if the interval has elapsed and it differs
    /// from the last one sent.
    fn due_snapshot(&mut self, interval: Duration, limit: usize) -> Option<String> {
        let now = Instant::now();
        if now.duration_since(self.last_edit) < interval {
            return None;
        }
        let snapshot = self.render(limit);
        if snapshot == self.last_sent {
            return None;
        }
        self.last_edit = now;
        Some(snapshot)
    }
}

impl Default for StreamBuffer {
    fn default() -> Self {
        Self::new()
    }
}

/// Where a delivery currently is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryState {
    /// Placeholder sent, nothing received yet.
    Pending,
    Accumulating,
    Finalizing,
    Done,
    Failed,
}

impl DeliveryState {
    fn is_terminal(self) -> bool {
        matches!(self, Self::Finalizing | Self::Done | Self::Failed)
    }
}

/// What to deliver and how to label it.
#[derive(Debug, Clone)]
pub struct DeliveryRequest {
    pub chat_id: ChatId,
    /// Provider display name used in status messages.
    pub display: String,
    pub signature: Option<Signature>,
    /// Attached to the final message.
    pub keyboard: Option<Keyboard>,
}

impl DeliveryRequest {
    pub fn new(chat_id: ChatId, display: impl Into<String>) -> Self {
        Self {
            chat_id,
            display: display.into(),
            signature: None,
            keyboard: None,
        }
    }

    pub fn with_signature(mut self, signature: Signature) -> Self {
        self.signature = Some(signature);
        self
    }

    pub fn with_keyboard(mut self, keyboard: Keyboard) -> Self {
        self.keyboard = Some(keyboard);
        self
    }
}

/// Result of finalizing a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Finalized {
    /// Nothing was received; the placeholder says so.
    Empty,
    /// Messages now holding the response, in order.
    Sent { messages: Vec<MessageHandle> },
}

/// Result of [`StreamingDelivery::deliver`].
#[derive(Debug, Clone)]
pub enum DeliveryOutcome {
    Delivered {
        generation: Generation,
        messages: Vec<MessageHandle>,
    },
    EmptyResponse,
    /// The error message replaced the placeholder.
    Failed { detail: String },
}

enum Target {
    Edit(MessageHandle),
    New(ChatId),
}

/// Drives streamed generations into a [`Transport`].
pub struct StreamingDelivery {
    transport: Arc<dyn Transport>,
    publisher: Option<Arc<dyn Publisher>>,
    config: DeliveryConfig,
}

impl StreamingDelivery {
    pub fn new(transport: Arc<dyn Transport>, config: DeliveryConfig) -> Self {
        Self {
            transport,
            publisher: None,
            config,
        }
    }

    pub fn with_publisher(mut self, publisher: Arc<dyn Publisher>) -> Self {
        self.publisher = Some(publisher);
        self
    }

    pub fn config(&self) -> &DeliveryConfig {
        &self.config
    }

    /// Send the placeholder and open a session.
    pub async fn begin(&self, request: DeliveryRequest) -> ParleyResult<StreamSession<'_>> {
        let placeholder = self
            .transport
            .send(
                request.chat_id,
                &format!("{} is thinking...", request.display),
                TextFormat::Plain,
                None,
            )
            .await?;
        Ok(StreamSession {
            delivery: self,
            request,
            placeholder,
            buffer: StreamBuffer::new(),
            state: DeliveryState::Pending,
        })
    }

    /// Deliver a whole generation stream.
    ///
    /// Fails only if the placeholder cannot be sent; generation errors end
    /// in [`DeliveryOutcome::Failed`].
    pub async fn deliver(
        &self,
        request: DeliveryRequest,
        stream: GenerationStream,
    ) -> ParleyResult<DeliveryOutcome> {
        let (mut events, handle) = stream;
        let mut session = self.begin(request).await?;

        while let Some(event) = events.recv().await {
            match event {
                StreamEvent::TextDelta { text } => session.push(&text).await?,
                StreamEvent::Done => break,
                StreamEvent::Error { message } => {
                    debug!(%message, "stream reported an error");
                    break;
                }
            }
        }
        drop(events);

        let result = match handle.await {
            Ok(result) => result,
            Err(e) => Err(ParleyError::Delivery(format!("generation task failed: {e}"))),
        };

        match result {
            Ok(generation) => match session.finish().await? {
                Finalized::Empty => Ok(DeliveryOutcome::EmptyResponse),
                Finalized::Sent { messages } => Ok(DeliveryOutcome::Delivered {
                    generation,
                    messages,
                }),
            },
            Err(e) => {
                let detail = e.to_string();
                session.fail(&detail).await?;
                Ok(DeliveryOutcome::Failed { detail })
            }
        }
    }

    /// Send `text` as a new message, split into chunks when its rendered
    /// form exceeds the transport limit. The keyboard rides on the last chunk.
    pub async fn send_long(
        &self,
        chat_id: ChatId,
        text: &str,
        keyboard: Option<&Keyboard>,
    ) -> Vec<MessageHandle> {
        let target = Target::New(chat_id);
        if md_to_html(text).chars().count() <= self.config.max_message_chars {
            return self
                .send_rich(&target, text, None, keyboard)
                .await
                .into_iter()
                .collect();
        }

        let chunks = split_text(text, self.config.chunk_chars);
        let last = chunks.len().saturating_sub(1);
        let mut messages = Vec::with_capacity(chunks.len());
        for (i, chunk) in chunks.iter().enumerate() {
            let keyboard = if i == last { keyboard } else { None };
            if let Some(handle) = self.send_rich(&target, chunk, None, keyboard).await {
                messages.push(handle);
            }
        }
        messages
    }

    /// Send pre-rendered HTML as a new message, falling back to `plain`
    /// when the transport rejects the markup.
    pub async fn send_formatted(
        &self,
        chat_id: ChatId,
        html: &str,
        plain: &str,
        keyboard: Option<&Keyboard>,
    ) -> Option<MessageHandle> {
        self.send_prepared(&Target::New(chat_id), html, plain, keyboard)
            .await
    }

    async fn send_rich(
        &self,
        target: &Target,
        text: &str,
        signature: Option<&Signature>,
        keyboard: Option<&Keyboard>,
    ) -> Option<MessageHandle> {
        let html = format!(
            "{}{}",
            md_to_html(text),
            signature.map(Signature::html).unwrap_or_default()
        );
        let plain = format!(
            "{text}{}",
            signature.map(Signature::plain).unwrap_or_default()
        );
        self.send_prepared(target, &html, &plain, keyboard).await
    }

    /// Rich text first, plain text on rejection. Failures are logged and
    /// swallowed.
    async fn send_prepared(
        &self,
        target: &Target,
        html: &str,
        plain: &str,
        keyboard: Option<&Keyboard>,
    ) -> Option<MessageHandle> {
        match self.put(target, html, TextFormat::Html, keyboard).await {
            Ok(handle) => return Some(handle),
            Err(e) if e.is_transport_rejection() => {
                debug!(error = %e, "rich text rejected, retrying as plain");
            }
            Err(e) => {
                warn!(error = %e, "failed to deliver message");
                return None;
            }
        }

        match self.put(target, plain, TextFormat::Plain, keyboard).await {
            Ok(handle) => Some(handle),
            Err(e) => {
                warn!(error = %e, "plain text fallback failed");
                None
            }
        }
    }

    async fn put(
        &self,
        target: &Target,
        text: &str,
        format: TextFormat,
        keyboard: Option<&Keyboard>,
    ) -> ParleyResult<MessageHandle> {
        match target {
            Target::Edit(handle) => {
                self.transport.edit(handle, text, format, keyboard).await?;
                Ok(*handle)
            }
            Target::New(chat_id) => self.transport.send(*chat_id, text, format, keyboard).await,
        }
    }
}

/// One in-flight delivery bound to its placeholder message.
pub struct StreamSession<'a> {
    delivery: &'a StreamingDelivery,
    request: DeliveryRequest,
    placeholder: MessageHandle,
    buffer: StreamBuffer,
    state: DeliveryState,
}

impl StreamSession<'_> {
    pub fn state(&self) -> DeliveryState {
        self.state
    }

    pub fn placeholder(&self) -> MessageHandle {
        self.placeholder
    }

    pub fn text(&self) -> &str {
        self.buffer.as_str()
    }

    /// Append a fragment and refresh the placeholder if an edit is due.
    ///
    /// Rejected edits are ignored.
    pub async fn push(&mut self, fragment: &str) -> ParleyResult<()> {
        if self.state.is_terminal() {
            return Err(ParleyError::Delivery(format!(
                "cannot append in state {:?}",
                self.state
            )));
        }
        self.state = DeliveryState::Accumulating;
        self.buffer.push(fragment);

        let config = &self.delivery.config;
        let limit = config
            .max_message_chars
            .saturating_sub(config.reserved_suffix_chars);
        let Some(snapshot) = self.buffer.due_snapshot(config.update_interval, limit) else {
            return Ok(());
        };

        match self
            .delivery
            .transport
            .edit(&self.placeholder, &snapshot, TextFormat::Plain, None)
            .await
        {
            Ok(()) => self.buffer.last_sent = snapshot,
            Err(e) => debug!(error = %e, "in-progress edit skipped"),
        }
        Ok(())
    }

    /// Replace the placeholder with the final response.
    pub async fn finish(&mut self) -> ParleyResult<Finalized> {
        if self.state.is_terminal() {
            return Err(ParleyError::Delivery(format!(
                "delivery already finalized ({:?})",
                self.state
            )));
        }
        self.state = DeliveryState::Finalizing;
        let delivery = self.delivery;
        let config = &delivery.config;

        if self.buffer.is_empty() {
            let text = format!("{} returned an empty response", self.request.display);
            if let Err(e) = delivery
                .transport
                .edit(&self.placeholder, &text, TextFormat::Plain, None)
                .await
            {
                warn!(error = %e, "failed to report empty response");
            }
            self.state = DeliveryState::Done;
            return Ok(Finalized::Empty);
        }

        let text = self.buffer.as_str();
        let signature = self.request.signature.as_ref();
        let keyboard = self.request.keyboard.as_ref();
        let target = Target::Edit(self.placeholder);

        let messages = if self.buffer.char_len() <= config.inline_threshold {
            delivery
                .send_rich(&target, text, signature, keyboard)
                .await
                .into_iter()
                .collect()
        } else {
            match self.publish().await {
                Some(url) => {
                    let mut markup = keyboard.cloned().unwrap_or_default();
                    markup.push_row(vec![Button::url(config.read_full_label.clone(), url)]);
                    let preview = preview(text, config.preview_chars);
                    delivery
                        .send_rich(&target, &preview, signature, Some(&markup))
                        .await
                        .into_iter()
                        .collect()
                }
                None => self.send_chunks().await,
            }
        };

        self.state = DeliveryState::Done;
        Ok(Finalized::Sent { messages })
    }

    /// Replace the placeholder with an error message.
    pub async fn fail(&mut self, detail: &str) -> ParleyResult<()> {
        if matches!(self.state, DeliveryState::Done | DeliveryState::Failed) {
            return Err(ParleyError::Delivery(format!(
                "delivery already finalized ({:?})",
                self.state
            )));
        }
        warn!(provider = %self.request.display, %detail, "streaming failed");

        let text = format!(
            "Error from {}: {}",
            self.request.display,
            truncate_chars(detail, MAX_ERROR_DETAIL_CHARS)
        );
        let transport = &self.delivery.transport;
        if transport
            .edit(&self.placeholder, &text, TextFormat::Plain, None)
            .await
            .is_err()
        {
            transport
                .send(self.request.chat_id, &text, TextFormat::Plain, None)
                .await?;
        }
        self.state = DeliveryState::Failed;
        Ok(())
    }

    async fn publish(&self) -> Option<String> {
        let publisher = self.delivery.publisher.as_ref()?;
        let (title, author) = match &self.request.signature {
            Some(sig) => (sig.title(), sig.label.clone()),
            None => (self.request.display.clone(), self.request.display.clone()),
        };
        match publisher.publish(&title, self.buffer.as_str(), &author).await {
            Ok(url) => Some(url),
            Err(e) => {
                warn!(error = %e, "publishing failed, splitting instead");
                None
            }
        }
    }

    async fn send_chunks(&self) -> Vec<MessageHandle> {
        let delivery = self.delivery;
        let chunks = split_text(self.buffer.as_str(), delivery.config.chunk_chars);
        let last = chunks.len().saturating_sub(1);
        let mut messages = Vec::with_capacity(chunks.len());

        for (i, chunk) in chunks.iter().enumerate() {
            let target = if i == 0 {
                Target::Edit(self.placeholder)
            } else {
                Target::New(self.request.chat_id)
            };
            let (signature, keyboard) = if i == last {
                (self.request.signature.as_ref(), self.request.keyboard.as_ref())
            } else {
                (None, None)
            };
            if let Some(handle) = delivery.send_rich(&target, chunk, signature, keyboard).await {
                messages.push(handle);
            }
        }
        messages
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::channel::ButtonAction;
    use async_trait::async_trait;
    use parley_core::Usage;
    use tokio::sync::{mpsc, Mutex};

    #[derive(Debug, Clone, PartialEq)]
    enum Op {
        Send,
        Edit,
    }

    #[derive(Debug, Clone)]
    struct Call {
        op: Op,
        message_id: i64,
        text: String,
        format: TextFormat,
        keyboard: Option<Keyboard>,
    }

    #[derive(Default)]
    struct MockTransport {
        calls: Mutex<Vec<Call>>,
        next_id: Mutex<i64>,
        reject_html: bool,
    }

    impl MockTransport {
        fn rejecting_html() -> Self {
            Self {
                reject_html: true,
                ..Self::default()
            }
        }

        async fn calls(&self) -> Vec<Call> {
            self.calls.lock().await.clone()
        }

        async fn record(
            &self,
            op: Op,
            message_id: i64,
            text: &str,
            format: TextFormat,
            keyboard: Option<&Keyboard>,
        ) -> ParleyResult<()> {
            if self.reject_html && format == TextFormat::Html {
                return Err(ParleyError::TransportRejected("can't parse entities".into()));
            }
            assert!(text.chars().count() <= MAX_MESSAGE_CHARS);
            self.calls.lock().await.push(Call {
                op,
                message_id,
                text: text.to_string(),
                format,
                keyboard: keyboard.cloned(),
            });
            Ok(())
        }
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn send(
            &self,
            chat_id: ChatId,
            text: &str,
            format: TextFormat,
            keyboard: Option<&Keyboard>,
        ) -> ParleyResult<MessageHandle> {
            let message_id = {
                let mut next = self.next_id.lock().await;
                *next += 1;
                *next
            };
            self.record(Op::Send, message_id, text, format, keyboard).await?;
            Ok(MessageHandle {
                chat_id,
                message_id,
            })
        }

        async fn edit(
            &self,
            handle: &MessageHandle,
            text: &str,
            format: TextFormat,
            keyboard: Option<&Keyboard>,
        ) -> ParleyResult<()> {
            self.record(Op::Edit, handle.message_id, text, format, keyboard).await
        }

        async fn delete(&self, _handle: &MessageHandle) -> ParleyResult<()> {
            Ok(())
        }
    }

    struct MockPublisher {
        fail: bool,
        titles: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl Publisher for MockPublisher {
        async fn publish(&self, title: &str, _content: &str, _author: &str) -> ParleyResult<String> {
            self.titles.lock().await.push(title.to_string());
            if self.fail {
                Err(ParleyError::Channel("telegraph down".into()))
            } else {
                Ok("https://telegra.ph/page".into())
            }
        }
    }

    fn fast() -> DeliveryConfig {
        DeliveryConfig {
            update_interval: Duration::ZERO,
            ..DeliveryConfig::default()
        }
    }

    fn signature() -> Signature {
        Signature {
            label: "Claude Opus 4.6".into(),
            date: "01.02.2026".into(),
            balance: None,
        }
    }

    fn request() -> DeliveryRequest {
        DeliveryRequest::new(7, "Claude")
            .with_signature(signature())
            .with_keyboard(Keyboard::new().row(vec![Button::callback("Regenerate", "regen")]))
    }

    fn long_text() -> String {
        (0..50).map(|i| format!("line {i:02} {}\n", "x".repeat(91))).collect()
    }

    // ── Test 1: Signature rendering ──

    #[test]
    fn signature_variants() {
        let sig = signature();
        assert_eq!(
            sig.html(),
            "\n\n<blockquote>\u{2014} Claude Opus 4.6 | 01.02.2026</blockquote>"
        );
        assert_eq!(sig.plain(), "\n\n\u{2014} Claude Opus 4.6 | 01.02.2026");
        let with_balance = sig.with_balance("$4.20");
        assert!(with_balance.plain().ends_with("| 01.02.2026 | $4.20"));
        assert_eq!(with_balance.title(), "Claude Opus 4.6 | 01.02.2026");
    }

    // ── Test 2: Split rules ──

    #[test]
    fn split_prefers_late_newlines() {
        let text = long_text();
        let chunks = split_text(&text, 3000);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 3000);
            assert!(!chunk.starts_with('\n'));
        }
        assert_eq!(chunks.concat().replace('\n', ""), text.replace('\n', ""));
    }

    #[test]
    fn split_is_hard_without_usable_newline() {
        let chunks = split_text(&"a".repeat(7000), 3000);
        let sizes: Vec<usize> = chunks.iter().map(|c| c.len()).collect();
        assert_eq!(sizes, vec![3000, 3000, 1000]);

        let early = format!("ab\n{}", "c".repeat(20));
        let chunks = split_text(&early, 10);
        assert_eq!(chunks[0], format!("ab\n{}", "c".repeat(7)));
    }

    #[test]
    fn preview_cuts_at_last_newline() {
        assert_eq!(preview("one\ntwo\nthree", 12), "one\ntwo\n...");
        assert_eq!(preview("no newline here", 9), "no ne\n...");
        let flat = "x".repeat(2000);
        assert_eq!(preview(&flat, 800).chars().count(), 800);
    }

    // ── Test 3: Short response is one formatted edit ──

    #[tokio::test]
    async fn short_response_single_edit_with_signature() {
        let transport = Arc::new(MockTransport::default());
        let delivery = StreamingDelivery::new(transport.clone(), fast());
        let mut session = delivery.begin(request()).await.unwrap();
        session.push("**Hello** ").await.unwrap();
        session.push("world").await.unwrap();
        let finalized = session.finish().await.unwrap();
        assert_eq!(
            finalized,
            Finalized::Sent {
                messages: vec![session.placeholder()]
            }
        );

        let calls = transport.calls().await;
        assert_eq!(calls[0].op, Op::Send);
        assert_eq!(calls[0].text, "Claude is thinking...");
        let last = calls.last().unwrap();
        assert_eq!(last.op, Op::Edit);
        assert_eq!(last.format, TextFormat::Html);
        assert_eq!(last.text, format!("<b>Hello</b> world{}", signature().html()));
        assert_eq!(last.keyboard, request().keyboard);
    }

    // ── Test 4: In-progress edits never shrink and carry the cursor ──

    #[tokio::test]
    async fn progress_edits_are_monotonic() {
        let transport = Arc::new(MockTransport::default());
        let delivery = StreamingDelivery::new(transport.clone(), fast());
        let mut session = delivery.begin(request()).await.unwrap();
        for _ in 0..60 {
            session.push(&"y".repeat(97)).await.unwrap();
        }

        let edits: Vec<String> = transport
            .calls()
            .await
            .into_iter()
            .filter(|c| c.op == Op::Edit)
            .map(|c| c.text)
            .collect();
        assert!(!edits.is_empty());
        let mut previous = 0;
        for edit in &edits {
            assert!(edit.ends_with(CURSOR));
            let len = edit.chars().count();
            assert!(len >= previous);
            assert!(len <= MAX_MESSAGE_CHARS);
            previous = len;
        }
        assert_eq!(previous, MAX_MESSAGE_CHARS - RESERVED_SUFFIX_CHARS + CURSOR.chars().count());
    }

    #[tokio::test]
    async fn throttled_session_skips_progress_edits() {
        let transport = Arc::new(MockTransport::default());
        let config = DeliveryConfig {
            update_interval: Duration::from_secs(3600),
            ..DeliveryConfig::default()
        };
        let delivery = StreamingDelivery::new(transport.clone(), config);
        let mut session = delivery.begin(request()).await.unwrap();
        session.push("a").await.unwrap();
        session.push("b").await.unwrap();
        assert_eq!(transport.calls().await.len(), 1);
        assert_eq!(session.state(), DeliveryState::Accumulating);
    }

    // ── Test 5: Long response with a publisher ──

    #[tokio::test]
    async fn long_response_is_published_with_preview() {
        let transport = Arc::new(MockTransport::default());
        let publisher = Arc::new(MockPublisher {
            fail: false,
            titles: Mutex::new(Vec::new()),
        });
        let delivery =
            StreamingDelivery::new(transport.clone(), fast()).with_publisher(publisher.clone());
        let mut session = delivery.begin(request()).await.unwrap();
        session.push(&long_text()).await.unwrap();
        let finalized = session.finish().await.unwrap();
        assert!(matches!(finalized, Finalized::Sent { ref messages } if messages.len() == 1));

        assert_eq!(
            publisher.titles.lock().await.as_slice(),
            ["Claude Opus 4.6 | 01.02.2026"]
        );
        let last = transport.calls().await.pop().unwrap();
        assert!(last.text.starts_with("line 00"));
        assert!(last.text.contains("\n..."));
        assert!(last.text.ends_with("</blockquote>"));
        let keyboard = last.keyboard.unwrap();
        assert_eq!(keyboard.rows.len(), 2);
        assert_eq!(
            keyboard.rows[1][0].action,
            ButtonAction::Url("https://telegra.ph/page".into())
        );
    }

    // ── Test 6: Long response without a publisher is split ──

    #[tokio::test]
    async fn long_response_is_split_into_chunks() {
        let transport = Arc::new(MockTransport::default());
        let delivery = StreamingDelivery::new(transport.clone(), fast());
        let mut session = delivery.begin(request()).await.unwrap();
        session.push(&long_text()).await.unwrap();
        let Finalized::Sent { messages } = session.finish().await.unwrap() else {
            panic!("expected messages");
        };
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], session.placeholder());

        let calls = transport.calls().await;
        let n = calls.len();
        let first = &calls[n - 2];
        let second = &calls[n - 1];
        assert_eq!(first.op, Op::Edit);
        assert!(first.keyboard.is_none());
        assert!(!first.text.contains("blockquote"));
        assert_eq!(second.op, Op::Send);
        assert!(second.keyboard.is_some());
        assert!(second.text.ends_with(&signature().html()));
    }

    #[tokio::test]
    async fn failed_publish_falls_back_to_chunks() {
        let transport = Arc::new(MockTransport::default());
        let publisher = Arc::new(MockPublisher {
            fail: true,
            titles: Mutex::new(Vec::new()),
        });
        let delivery = StreamingDelivery::new(transport.clone(), fast()).with_publisher(publisher);
        let mut session = delivery.begin(request()).await.unwrap();
        session.push(&long_text()).await.unwrap();
        let Finalized::Sent { messages } = session.finish().await.unwrap() else {
            panic!("expected messages");
        };
        assert_eq!(messages.len(), 2);
    }

    // ── Test 7: Empty buffer ──

    #[tokio::test]
    async fn empty_buffer_reports_empty_response() {
        let transport = Arc::new(MockTransport::default());
        let delivery = StreamingDelivery::new(transport.clone(), fast());
        let mut session = delivery.begin(request()).await.unwrap();
        assert_eq!(session.finish().await.unwrap(), Finalized::Empty);
        let last = transport.calls().await.pop().unwrap();
        assert_eq!(last.text, "Claude returned an empty response");
    }

    // ── Test 8: Finalizing happens once ──

    #[tokio::test]
    async fn finish_rejects_reentry() {
        let transport = Arc::new(MockTransport::default());
        let delivery = StreamingDelivery::new(transport.clone(), fast());
        let mut session = delivery.begin(request()).await.unwrap();
        session.push("hi").await.unwrap();
        session.finish().await.unwrap();
        assert_eq!(session.state(), DeliveryState::Done);
        assert!(matches!(session.finish().await, Err(ParleyError::Delivery(_))));
        assert!(matches!(session.push("more").await, Err(ParleyError::Delivery(_))));
        assert!(matches!(session.fail("late").await, Err(ParleyError::Delivery(_))));
    }

    // ── Test 9: Rejected markup falls back to plain text ──

    #[tokio::test]
    async fn rejected_html_retries_plain() {
        let transport = Arc::new(MockTransport::rejecting_html());
        let delivery = StreamingDelivery::new(transport.clone(), fast());
        let mut session = delivery.begin(request()).await.unwrap();
        session.push("*broken").await.unwrap();
        session.finish().await.unwrap();
        let last = transport.calls().await.pop().unwrap();
        assert_eq!(last.format, TextFormat::Plain);
        assert_eq!(last.text, format!("*broken{}", signature().plain()));
    }

    // ── Test 10: send_long splits and keeps the keyboard last ──

    #[tokio::test]
    async fn send_long_splits_oversized_text() {
        let transport = Arc::new(MockTransport::default());
        let delivery = StreamingDelivery::new(transport.clone(), fast());
        let kb = Keyboard::new().row(vec![Button::callback("Summary", "debate:summary")]);

        let short = delivery.send_long(7, "short", Some(&kb)).await;
        assert_eq!(short.len(), 1);

        let long = delivery.send_long(7, &long_text(), Some(&kb)).await;
        assert_eq!(long.len(), 2);
        let calls = transport.calls().await;
        assert!(calls[calls.len() - 2].keyboard.is_none());
        assert_eq!(calls[calls.len() - 1].keyboard.as_ref(), Some(&kb));
    }

    // ── Test 11: deliver() over a stream ──

    fn stream_of(
        fragments: Vec<&'static str>,
        result: ParleyResult<Generation>,
    ) -> GenerationStream {
        let (tx, rx) = mpsc::channel(16);
        let handle = tokio::spawn(async move {
            for fragment in fragments {
                let _ = tx
                    .send(StreamEvent::TextDelta {
                        text: fragment.into(),
                    })
                    .await;
            }
            let terminal = match &result {
                Ok(_) => StreamEvent::Done,
                Err(e) => StreamEvent::Error {
                    message: e.to_string(),
                },
            };
            let _ = tx.send(terminal).await;
            result
        });
        (rx, handle)
    }

    #[tokio::test]
    async fn deliver_returns_generation() {
        let transport = Arc::new(MockTransport::default());
        let delivery = StreamingDelivery::new(transport.clone(), fast());
        let generation = Generation::new("claude", "claude-opus-4-6", "Hi there", Some(Usage::new(3, 2)));
        let outcome = delivery
            .deliver(request(), stream_of(vec!["Hi ", "there"], Ok(generation)))
            .await
            .unwrap();
        let DeliveryOutcome::Delivered {
            generation,
            messages,
        } = outcome
        else {
            panic!("expected delivery");
        };
        assert_eq!(generation.text, "Hi there");
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn deliver_reports_errors_in_placeholder() {
        let transport = Arc::new(MockTransport::default());
        let delivery = StreamingDelivery::new(transport.clone(), fast());
        let outcome = delivery
            .deliver(
                request(),
                stream_of(vec!["partial"], Err(ParleyError::fatal("claude", "boom"))),
            )
            .await
            .unwrap();
        assert!(matches!(outcome, DeliveryOutcome::Failed { .. }));
        let last = transport.calls().await.pop().unwrap();
        assert!(last.text.starts_with("Error from Claude: "));
        assert!(last.text.contains("boom"));
    }
}
