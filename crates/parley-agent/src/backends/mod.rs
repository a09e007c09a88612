pub mod claude;
pub mod gemini;
pub mod openai;

use crate::config::{LlmProvider, ModelConfig};
use async_trait::async_trait;
use futures_util::StreamExt;
use parley_core::{ChatMessage, Generation, ParleyError, ParleyResult, ProviderErrorKind, StreamEvent, Usage};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// Receiver of incremental events plus a handle resolving to the full result.
pub type GenerationStream = (mpsc::Receiver<StreamEvent>, JoinHandle<ParleyResult<Generation>>);

/// Trait for model provider backends.
///
/// Each provider (Claude, OpenAI, Gemini) implements this trait to handle API
/// communication. Every failure leaving a backend is a
/// [`ParleyError::Provider`] carrying a [`ProviderErrorKind`], so the
/// fallback policy never has to inspect provider-specific error text.
///
/// Streaming backends send a [`StreamEvent::Error`] before the join handle
/// resolves to `Err`, and a [`StreamEvent::Done`] before it resolves to `Ok`.
#[async_trait]
pub trait LlmBackend: Send + Sync {
    /// Provider id (`claude`, `gpt`, `gemini`).
    fn provider_id(&self) -> &str;

    /// Model id this backend calls.
    fn model_id(&self) -> &str;

    /// One-shot completion.
    async fn generate(
        &self,
        system_prompt: Option<&str>,
        messages: &[ChatMessage],
    ) -> ParleyResult<Generation>;

    /// Streaming completion.
    async fn generate_stream(
        &self,
        system_prompt: Option<&str>,
        messages: &[ChatMessage],
    ) -> ParleyResult<GenerationStream>;

    /// One-shot completion over a single image plus a text prompt.
    async fn generate_with_image(
        &self,
        image: &[u8],
        mime_type: &str,
        prompt: &str,
        system_prompt: Option<&str>,
    ) -> ParleyResult<Generation>;
}

/// Build the concrete backend for a config.
pub fn build_backend(config: ModelConfig) -> ParleyResult<Arc<dyn LlmBackend>> {
    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .build()
        .map_err(|e| ParleyError::Http(e.to_string()))?;

    let backend: Arc<dyn LlmBackend> = match config.provider {
        LlmProvider::Claude => Arc::new(claude::ClaudeBackend::new(config, http)),
        LlmProvider::OpenAi => Arc::new(openai::OpenAiBackend::new(config, http)),
        LlmProvider::Gemini => Arc::new(gemini::GeminiBackend::new(config, http)),
    };
    Ok(backend)
}

/// Classify a non-success HTTP response.
///
/// 429 or a `RESOURCE_EXHAUSTED` body is a rate limit; 408 and 5xx are
/// transient; everything else is fatal.
pub fn classify_status(status: u16, body: &str) -> ProviderErrorKind {
    if status == 429 || body.contains("RESOURCE_EXHAUSTED") {
        ProviderErrorKind::RateLimited
    } else if status == 408 || (500..600).contains(&status) {
        ProviderErrorKind::Transient
    } else {
        ProviderErrorKind::Fatal
    }
}

/// Classify a transport-level reqwest failure.
pub fn classify_request_error(err: &reqwest::Error) -> ProviderErrorKind {
    if err.is_timeout() || err.is_connect() || err.is_request() || err.is_body() {
        ProviderErrorKind::Transient
    } else if let Some(status) = err.status() {
        classify_status(status.as_u16(), "")
    } else {
        ProviderErrorKind::Fatal
    }
}

pub(crate) fn request_error(provider: &str, err: reqwest::Error) -> ParleyError {
    ParleyError::provider(provider, classify_request_error(&err), err.to_string())
}

/// Send a request and return the successful response, classifying failures.
pub(crate) async fn send_checked(
    provider: &str,
    request: reqwest::RequestBuilder,
) -> ParleyResult<reqwest::Response> {
    let resp = request.send().await.map_err(|e| request_error(provider, e))?;
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }

    let body = resp
        .text()
        .await
        .unwrap_or_else(|_| "unknown error".to_string());
    Err(ParleyError::provider(
        provider,
        classify_status(status.as_u16(), &body),
        format!("API error {status}: {body}"),
    ))
}

/// Read a successful response body as JSON.
pub(crate) async fn read_json(provider: &str, resp: reqwest::Response) -> ParleyResult<serde_json::Value> {
    resp.json()
        .await
        .map_err(|e| ParleyError::fatal(provider, format!("Unparseable response: {e}")))
}

/// Per-stream accumulator that SSE event handlers write into.
#[derive(Debug, Default)]
pub(crate) struct SseState {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

impl SseState {
    fn usage(&self) -> Option<Usage> {
        match (self.input_tokens, self.output_tokens) {
            (None, None) => None,
            (i, o) => Some(Usage::new(i.unwrap_or(0), o.unwrap_or(0))),
        }
    }
}

/// Drive a server-sent-events body on a background task.
///
/// `on_event` receives every parsed `data:` payload and returns the text
/// fragment it carries, if any. Fragments are forwarded as
/// [`StreamEvent::TextDelta`] and concatenated into the final [`Generation`].
pub(crate) fn spawn_sse<F>(
    provider: String,
    model: String,
    resp: reqwest::Response,
    on_event: F,
) -> GenerationStream
where
    F: FnMut(&serde_json::Value, &mut SseState) -> ParleyResult<Option<String>> + Send + 'static,
{
    spawn_sse_stream(provider, model, resp.bytes_stream(), on_event)
}

/// Same as [`spawn_sse`], over any stream of byte chunks.
///
/// Chunks are buffered as raw bytes and only complete lines are decoded, so a
/// multi-byte character split across chunk boundaries survives intact.
pub(crate) fn spawn_sse_stream<S, B, E, F>(
    provider: String,
    model: String,
    byte_stream: S,
    mut on_event: F,
) -> GenerationStream
where
    S: futures_util::Stream<Item = Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
    F: FnMut(&serde_json::Value, &mut SseState) -> ParleyResult<Option<String>> + Send + 'static,
{
    let (tx, rx) = mpsc::channel::<StreamEvent>(256);

    let handle = tokio::spawn(async move {
        let mut stream = Box::pin(byte_stream);
        let mut buffer: Vec<u8> = Vec::new();
        let mut full_text = String::new();
        let mut state = SseState::default();

        while let Some(chunk_result) = stream.next().await {
            let chunk = match chunk_result {
                Ok(bytes) => bytes,
                Err(e) => {
                    let message = format!("Stream read error: {e}");
                    let _ = tx.send(StreamEvent::Error { message: message.clone() }).await;
                    return Err(ParleyError::transient(&provider, message));
                }
            };

            buffer.extend_from_slice(chunk.as_ref());

            while let Some(line_end) = buffer.iter().position(|&b| b == b'\n') {
                let raw: Vec<u8> = buffer.drain(..=line_end).collect();
                let line = String::from_utf8_lossy(&raw[..line_end]);
                let line = line.trim();

                if line.is_empty() || line.starts_with(':') {
                    continue;
                }

                let Some(data) = line.strip_prefix("data:").map(str::trim_start) else {
                    continue;
                };
                if data == "[DONE]" {
                    continue;
                }

                let event: serde_json::Value = match serde_json::from_str(data) {
                    Ok(v) => v,
                    Err(_) => continue,
                };

                match on_event(&event, &mut state) {
                    Ok(Some(text)) if !text.is_empty() => {
                        full_text.push_str(&text);
                        let _ = tx.send(StreamEvent::TextDelta { text }).await;
                    }
                    Ok(_) => {}
                    Err(e) => {
                        let _ = tx.send(StreamEvent::Error { message: e.to_string() }).await;
                        return Err(e);
                    }
                }
            }
        }

        let _ = tx.send(StreamEvent::Done).await;
        Ok(Generation::new(provider, model, full_text, state.usage()))
    });

    (rx, handle)
}
