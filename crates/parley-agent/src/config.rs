use serde::{Deserialize, Serialize};

/// Model fallback chain appended after the configured Gemini model.
pub const GEMINI_FALLBACK_CHAIN: &[&str] = &["gemini-2.5-pro", "gemini-2.5-flash", "gemini-2.0-flash"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LlmProvider {
    /// Anthropic Messages API.
    Claude,
    /// OpenAI chat completions API.
    OpenAi,
    /// Google Generative Language API.
    Gemini,
}

impl LlmProvider {
    /// Stable provider id used in preferences, callbacks and logs.
    pub fn id(&self) -> &'static str {
        match self {
            LlmProvider::Claude => "claude",
            LlmProvider::OpenAi => "gpt",
            LlmProvider::Gemini => "gemini",
        }
    }

    /// Human-facing name shown in placeholders and signatures.
    pub fn display_name(&self) -> &'static str {
        match self {
            LlmProvider::Claude => "Claude",
            LlmProvider::OpenAi => "GPT",
            LlmProvider::Gemini => "Gemini",
        }
    }

    pub fn from_id(id: &str) -> Option<Self> {
        match id {
            "claude" => Some(LlmProvider::Claude),
            "gpt" => Some(LlmProvider::OpenAi),
            "gemini" => Some(LlmProvider::Gemini),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    pub provider: LlmProvider,
    pub model_id: String,
    #[serde(default)]
    pub api_key: String,
    pub api_base_url: Option<String>,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Extra model ids tried in order after `model_id` on rate limits.
    #[serde(default)]
    pub fallback_models: Vec<String>,
}

fn default_temperature() -> f32 {
    0.7
}

fn default_max_tokens() -> u32 {
    4096
}

fn default_timeout_secs() -> u64 {
    120
}

impl ModelConfig {
    pub fn new(provider: LlmProvider, model_id: impl Into<String>, api_key: impl Into<String>) -> Self {
        Self {
            provider,
            model_id: model_id.into(),
            api_key: api_key.into(),
            api_base_url: None,
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            timeout_secs: default_timeout_secs(),
            fallback_models: Vec::new(),
        }
    }

    pub fn base_url(&self) -> &str {
        if let Some(url) = &self.api_base_url {
            url.trim_end_matches('/')
        } else {
            match self.provider {
                LlmProvider::Claude => "https://api.anthropic.com",
                LlmProvider::OpenAi => "https://api.openai.com",
                LlmProvider::Gemini => "https://generativelanguage.googleapis.com",
            }
        }
    }

    /// The primary model followed by its fallbacks, without duplicates.
    ///
    /// Gemini gets the built-in chain after any configured fallbacks.
    pub fn model_chain(&self) -> Vec<String> {
        let builtin: &[&str] = match self.provider {
            LlmProvider::Gemini => GEMINI_FALLBACK_CHAIN,
            _ => &[],
        };

        let mut chain = vec![self.model_id.clone()];
        let extra = self
            .fallback_models
            .iter()
            .map(String::as_str)
            .chain(builtin.iter().copied());
        for model in extra {
            if !chain.iter().any(|m| m == model) {
                chain.push(model.to_string());
            }
        }
        chain
    }

    /// A copy of this config targeting a different model.
    pub fn with_model(&self, model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            fallback_models: Vec::new(),
            ..self.clone()
        }
    }
}
