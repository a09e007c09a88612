use serde::{Deserialize, Serialize};

/// Token accounting for a single backend call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens billed by the provider.
    pub input_tokens: u64,
    /// Completion tokens billed by the provider.
    pub output_tokens: u64,
}

impl Usage {
    /// Creates a usage record.
    pub fn new(input_tokens: u64, output_tokens: u64) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Input plus output tokens.
    pub fn total(&self) -> u64 {
        self.input_tokens + self.output_tokens
    }
}

/// The result of one backend call: the text and the usage it cost, together.
///
/// Returning both in one record means usage is always attributed to exactly
/// the call that produced it, even when calls to the same backend overlap.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Generation {
    /// Provider id that served the call.
    pub provider: String,
    /// Concrete model id that served the call (may be a fallback model).
    pub model: String,
    /// The generated text.
    pub text: String,
    /// Usage, when the provider reported it.
    pub usage: Option<Usage>,
}

impl Generation {
    /// Creates a generation record.
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        text: impl Into<String>,
        usage: Option<Usage>,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            text: text.into(),
            usage,
        }
    }
}
