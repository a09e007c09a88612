use super::{read_json, send_checked, spawn_sse, GenerationStream, LlmBackend};
use crate::config::ModelConfig;
use async_trait::async_trait;
use base64::Engine;
use parley_core::{ChatMessage, Generation, ParleyError, ParleyResult, Usage};

/// OpenAI chat completions backend.
///
/// Also works with any server that implements the same API when
/// `api_base_url` is set.
pub struct OpenAiBackend {
    config: ModelConfig,
    http: reqwest::Client,
}

impl OpenAiBackend {
    pub fn new(config: ModelConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    fn provider(&self) -> &'static str {
        self.config.provider.id()
    }

    fn build_messages(
        &self,
        system_prompt: Option<&str>,
        messages: &[ChatMessage],
    ) -> Vec<serde_json::Value> {
        let mut api_messages: Vec<serde_json::Value> = Vec::with_capacity(messages.len() + 1);

        if let Some(sys) = system_prompt.filter(|s| !s.is_empty()) {
            api_messages.push(serde_json::json!({
                "role": "system",
                "content": sys
            }));
        }

        for m in messages {
            api_messages.push(serde_json::json!({
                "role": m.role.as_str(),
                "content": m.content
            }));
        }

        api_messages
    }

    fn body(&self, messages: Vec<serde_json::Value>, stream: bool) -> serde_json::Value {
        let mut body = serde_json::json!({
            "model": self.config.model_id,
            "max_tokens": self.config.max_tokens,
            "temperature": self.config.temperature,
            "messages": messages,
        });
        if stream {
            body["stream"] = serde_json::json!(true);
            body["stream_options"] = serde_json::json!({ "include_usage": true });
        }
        body
    }

    fn request(&self, body: &serde_json::Value) -> reqwest::RequestBuilder {
        self.http
            .post(format!("{}/v1/chat/completions", self.config.base_url()))
            .header("Authorization", format!("Bearer {}", self.config.api_key))
            .header("Content-Type", "application/json")
            .json(body)
    }

    async fn complete(&self, body: serde_json::Value) -> ParleyResult<Generation> {
        let resp = send_checked(self.provider(), self.request(&body)).await?;
        let json = read_json(self.provider(), resp).await?;
        parse_openai_response(self.provider(), &self.config.model_id, &json)
    }
}

#[async_trait]
impl LlmBackend for OpenAiBackend {
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
        let body = self.body(self.build_messages(system_prompt, messages), false);
        self.complete(body).await
    }

    async fn generate_stream(
        &self,
        system_prompt: Option<&str>,
        messages: &[ChatMessage],
    ) -> ParleyResult<GenerationStream> {
        let body = self.body(self.build_messages(system_prompt, messages), true);
        let resp = send_checked(self.provider(), self.request(&body)).await?;

        Ok(spawn_sse(
            self.provider().to_string(),
            self.config.model_id.clone(),
            resp,
            |event, state| {
                // The final chunk carries usage and an empty choices array.
                let usage = &event["usage"];
                if let Some(input) = usage["prompt_tokens"].as_u64() {
                    state.input_tokens = Some(input);
                    state.output_tokens = usage["completion_tokens"].as_u64();
                }
                Ok(event["choices"][0]["delta"]["content"]
                    .as_str()
                    .map(str::to_string))
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
        let mut messages = self.build_messages(system_prompt, &[]);
        messages.push(serde_json::json!({
            "role": "user",
            "content": [
                { "type": "text", "text": prompt },
                {
                    "type": "image_url",
                    "image_url": { "url": format!("data:{mime_type};base64,{data}") }
                }
            ]
        }));
        self.complete(self.body(messages, false)).await
    }
}

pub fn parse_openai_response(
    provider: &str,
    model: &str,
    body: &serde_json::Value,
) -> ParleyResult<Generation> {
    let message = &body["choices"][0]["message"];
    if message.is_null() {
        return Err(ParleyError::fatal(provider, "Missing choices in OpenAI response"));
    }
    let content = message["content"].as_str().unwrap_or_default();

    let usage = &body["usage"];
    let usage = usage["prompt_tokens"].as_u64().map(|input| {
        Usage::new(input, usage["completion_tokens"].as_u64().unwrap_or(0))
    });

    let model = body["model"].as_str().unwrap_or(model);
    Ok(Generation::new(provider, model, content, usage))
}
