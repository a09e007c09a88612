use super::{read_json, send_checked, spawn_sse, GenerationStream, LlmBackend};
use crate::config::ModelConfig;
use async_trait::async_trait;
use base64::Engine;
use parley_core::{ChatMessage, Generation, ParleyError, ParleyResult, Role, Usage};

/// Gemini (Google Generative Language API) backend.
pub struct GeminiBackend {
    config: ModelConfig,
    http: reqwest::Client,
}

impl GeminiBackend {
    pub fn new(config: ModelConfig, http: reqwest::Client) -> Self {
        Self { config, http }
    }

    fn provider(&self) -> &'static str {
        self.config.provider.id()
    }

    fn body(&self, system_prompt: Option<&str>, contents: serde_json::Value) -> serde_json::Value {
        let mut body = serde_json::json!({
            "contents": contents,
            "generationConfig": {
                "temperature": self.config.temperature,
                "maxOutputTokens": self.config.max_tokens,
            },
        });
        if let Some(sys) = system_prompt.filter(|s| !s.is_empty()) {
            body["systemInstruction"] = serde_json::json!({ "parts": [{ "text": sys }] });
        }
        body
    }

    fn request(&self, method: &str, body: &serde_json::Value) -> reqwest::RequestBuilder {
        let url = format!(
            "{}/v1beta/models/{}:{}",
            self.config.base_url(),
            self.config.model_id,
            method
        );
        self.http
            .post(url)
            .header("x-goog-api-key", &self.config.api_key)
            .header("Content-Type", "application/json")
            .json(body)
    }

    async fn complete(&self, body: serde_json::Value) -> ParleyResult<Generation> {
        let resp = send_checked(self.provider(), self.request("generateContent", &body)).await?;
        let json = read_json(self.provider(), resp).await?;
        parse_gemini_response(self.provider(), &self.config.model_id, &json)
    }
}

#[async_trait]
impl LlmBackend for GeminiBackend {
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
        self.complete(self.body(system_prompt, gemini_contents(messages)))
            .await
    }

    async fn generate_stream(
        &self,
        system_prompt: Option<&str>,
        messages: &[ChatMessage],
    ) -> ParleyResult<GenerationStream> {
        let body = self.body(system_prompt, gemini_contents(messages));
        let resp = send_checked(
            self.provider(),
            self.request("streamGenerateContent?alt=sse", &body),
        )
        .await?;

        Ok(spawn_sse(
            self.provider().to_string(),
            self.config.model_id.clone(),
            resp,
            |event, state| {
                if let Some(usage) = usage_of(event) {
                    state.input_tokens = Some(usage.input_tokens);
                    state.output_tokens = Some(usage.output_tokens);
                }
                Ok(Some(candidate_text(event)))
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
        let contents = serde_json::json!([{
            "role": "user",
            "parts": [
                { "inline_data": { "mime_type": mime_type, "data": data } },
                { "text": prompt }
            ]
        }]);
        self.complete(self.body(system_prompt, contents)).await
    }
}

fn gemini_contents(messages: &[ChatMessage]) -> serde_json::Value {
    let contents: Vec<serde_json::Value> = messages
        .iter()
        .map(|m| {
            let role = match m.role {
                Role::User => "user",
                Role::Assistant => "model",
            };
            serde_json::json!({ "role": role, "parts": [{ "text": m.content }] })
        })
        .collect();
    serde_json::Value::Array(contents)
}

fn candidate_text(body: &serde_json::Value) -> String {
    body["candidates"][0]["content"]["parts"]
        .as_array()
        .map(|parts| {
            parts
                .iter()
                .filter_map(|p| p["text"].as_str())
                .collect::<String>()
        })
        .unwrap_or_default()
}

fn usage_of(body: &serde_json::Value) -> Option<Usage> {
    let meta = &body["usageMetadata"];
    let input = meta["promptTokenCount"].as_u64()?;
    Some(Usage::new(input, meta["candidatesTokenCount"].as_u64().unwrap_or(0)))
}

pub fn parse_gemini_response(
    provider: &str,
    model: &str,
    body: &serde_json::Value,
) -> ParleyResult<Generation> {
    if body["candidates"].as_array().map_or(true, Vec::is_empty) {
        let reason = body["promptFeedback"]["blockReason"]
            .as_str()
            .unwrap_or("no candidates");
        return Err(ParleyError::fatal(
            provider,
            format!("Gemini returned no candidates: {reason}"),
        ));
    }
    Ok(Generation::new(provider, model, candidate_text(body), usage_of(body)))
}
