use super::{read_json, send_checked, spawn_sse, GenerationStream, LlmBackend};
use crate::config::ModelConfig;
use async_trait::async_trait;
use base64::Engine;
use parley_core::{ChatMessage, Generation, ParleyError, ParleyResult, ProviderErrorKind, Usage};
use serde::Serialize;

const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Claude (Anthropic Messages API) backend.
pub struct ClaudeBackend {
    config: ModelConfig,
    http: reqwest::Client,
}

impl ClaudeBackend {
    pub fn new(config: ModelConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    fn provider(&self) -> &'static str {
        self.config.provider.id()
    }

    fn body(
        &self,
        system_prompt: Option<&str>,
        messages: serde_json::Value,
        stream: bool,
    ) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.config.model_id,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "messages": messages,
        });
        if stream {
            body["stream"] = serde_json::json!(true);
        }
        if let Some(sys) = system_prompt.filter(|s| !s.is_empty()) {
            body["system"] = serde_json::json!(sys);
        }
        body
    }

    fn request(&self, body: &serde_json::Value) -> reqwest::RequestBuilder {
        self.http
            .post(format!("{}/v1/messages", self.config.base_url()))
            .header("x-api-key", &self.config.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .header("content-type", "application/json")
            .json(body)
    }

    async fn complete(&self, body: serde_json::Value) -> ParleyResult<Generation> {
        let resp = send_checked(self.provider(), self.request(&body)).await?;
        let json = read_json(self.provider(), resp).await?;
        parse_claude_response(self.provider(), &self.config.model_id, &json)
    }
}

#[async_trait]
impl LlmBackend for ClaudeBackend {
    fn provider_id(&self) -> &str {
        self.provider()
    }

    fn model_id(&self) -> &str {
        &self.config.model_id
    }

    async fn generate(
        &self,
        system_prompt: Option<&str>,
        messages: &[ChatMessage],
    ) -> ParleyResult<Generation> {
        let body = self.body(system_prompt, serde_json::to_value(claude_messages(messages))?, false);
        self.complete(body).await
    }

    async fn generate_stream(
        &self,
        system_prompt: Option<&str>,
        messages: &[ChatMessage],
    ) -> ParleyResult<GenerationStream> {
        let body = self.body(system_prompt, serde_json::to_value(claude_messages(messages))?, true);
        let resp = send_checked(self.provider(), self.request(&body)).await?;

        let provider = self.provider();
        Ok(spawn_sse(
            provider.to_string(),
            self.config.model_id.clone(),
            resp,
            move |event, state| match event["type"].as_str().unwrap_or("") {
                "message_start" => {
                    let usage = &event["message"]["usage"];
                    state.input_tokens = usage["input_tokens"].as_u64();
                    if let Some(out) = usage["output_tokens"].as_u64() {
                        state.output_tokens = Some(out);
                    }
                    Ok(None)
                }
                "content_block_delta" => {
                    let delta = &event["delta"];
                    if delta["type"].as_str() == Some("text_delta") {
                        Ok(delta["text"].as_str().map(str::to_string))
                    } else {
                        Ok(None)
                    }
                }
                "message_delta" => {
                    if let Some(out) = event["usage"]["output_tokens"].as_u64() {
                        state.output_tokens = Some(out);
                    }
                    Ok(None)
                }
                "error" => Err(stream_error(provider, &event["error"])),
                _ => Ok(None),
            },
        ))
    }

    async fn generate_with_image(
        &self,
        image: &[u8],
        mime_type: &str,
        prompt: &str,
        system_prompt: Option<&str>,
    ) -> ParleyResult<Generation> {
        let data = base64::engine::general_purpose::STANDARD.encode(image);
        let messages = serde_json::json!([{
            "role": "user",
            "content": [
                {
                    "type": "image",
                    "source": { "type": "base64", "media_type": mime_type, "data": data }
                },
                { "type": "text", "text": prompt }
            ]
        }]);
        self.complete(self.body(system_prompt, messages, false)).await
    }
}

// -- Claude wire types --

#[derive(Serialize)]
struct ClaudeMessage<'a> {
    role: &'static str,
    content: &'a str,
}

fn claude_messages(messages: &[ChatMessage]) -> Vec<ClaudeMessage<'_>> {
    messages
        .iter()
        .map(|m| ClaudeMessage {
            role: m.role.as_str(),
            content: &m.content,
        })
        .collect()
}

/// Map an in-stream `error` event to a classified provider error.
fn stream_error(provider: &str, error: &serde_json::Value) -> ParleyError {
    let kind = match error["type"].as_str() {
        Some("rate_limit_error") => ProviderErrorKind::RateLimited,
        Some("overloaded_error") | Some("api_error") => ProviderErrorKind::Transient,
        _ => ProviderErrorKind::Fatal,
    };
    let detail = error["message"].as_str().unwrap_or("stream error").to_string();
    ParleyError::provider(provider, kind, detail)
}

pub fn parse_claude_response(
    provider: &str,
    model: &str,
    body: &serde_json::Value,
) -> ParleyResult<Generation> {
    let content = body["content"]
        .as_array()
        .ok_or_else(|| ParleyError::fatal(provider, "Missing content in Claude response"))?;

    let text = content
        .iter()
        .filter(|block| block["type"].as_str() == Some("text"))
        .filter_map(|block| block["text"].as_str())
        .collect::<Vec<_>>()
        .join("\n");

    let usage = &body["usage"];
    let usage = usage["input_tokens"].as_u64().map(|input| {
        Usage::new(input, usage["output_tokens"].as_u64().unwrap_or(0))
    });

    let model = body["model"].as_str().unwrap_or(model);
    Ok(Generation::new(provider, model, text, usage))
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn parse_text_blocks_and_usage() {
        let body = serde_json::json!({
            "model": "claude-opus-4-6",
            "content": [
                {"type": "text", "text": "Hello"},
                {"type": "text", "text": "world"}
            ],
            "usage": {"input_tokens": 12, "output_tokens": 3}
        });
        let generation = parse_claude_response("claude", "fallback", &body).unwrap();
        assert_eq!(generation.text, "Hello\nworld");
        assert_eq!(generation.model, "claude-opus-4-6");
        assert_eq!(generation.usage, Some(Usage::new(12, 3)));
    }

    #[test]
    fn missing_content_is_fatal() {
        let err = parse_claude_response("claude", "m", &serde_json::json!({})).unwrap_err();
        assert_eq!(err.provider_kind(), Some(ProviderErrorKind::Fatal));
    }

    #[test]
    fn stream_error_classification() {
        let overloaded = serde_json::json!({"type": "overloaded_error", "message": "Overloaded"});
        assert_eq!(
            stream_error("claude", &overloaded).provider_kind(),
            Some(ProviderErrorKind::Transient)
        );
        let invalid = serde_json::json!({"type": "invalid_request_error"});
        assert_eq!(
            stream_error("claude", &invalid).provider_kind(),
            Some(ProviderErrorKind::Fatal)
        );
    }
}
