use parley_core::Generation;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Accumulated usage for one provider.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ProviderUsage {
    pub calls: u64,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub errors: u64,
}

/// Per-provider call, token and error counters.
///
/// Every successful backend call is recorded exactly once, from the
/// [`Generation`] that call returned.
#[derive(Clone, Default)]
pub struct UsageLedger {
    providers: Arc<RwLock<HashMap<String, ProviderUsage>>>,
}

impl UsageLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a successful call.
    pub async fn record(&self, generation: &Generation) {
        let mut providers = self.providers.write().await;
        let entry = providers.entry(generation.provider.clone()).or_default();
        entry.calls += 1;
        if let Some(usage) = generation.usage {
            entry.input_tokens += usage.input_tokens;
            entry.output_tokens += usage.output_tokens;
        }
    }

    /// Record a failed call.
    pub async fn record_error(&self, provider_id: &str) {
        let mut providers = self.providers.write().await;
        providers.entry(provider_id.to_string()).or_default().errors += 1;
    }

    pub async fn get(&self, provider_id: &str) -> Option<ProviderUsage> {
        self.providers.read().await.get(provider_id).cloned()
    }

    /// All providers, sorted by id.
    pub async fn snapshot(&self) -> Vec<(String, ProviderUsage)> {
        let providers = self.providers.read().await;
        let mut rows: Vec<_> = providers
            .iter()
            .map(|(id, usage)| (id.clone(), usage.clone()))
            .collect();
        rows.sort_by(|a, b| a.0.cmp(&b.0));
        rows
    }

    /// Sum across all providers.
    pub async fn aggregate(&self) -> ProviderUsage {
        let providers = self.providers.read().await;
        let mut total = ProviderUsage::default();
        for usage in providers.values() {
            total.calls += usage.calls;
            total.input_tokens += usage.input_tokens;
            total.output_tokens += usage.output_tokens;
            total.errors += usage.errors;
        }
        total
    }

    /// Plain-text report for the `/usage` command.
    pub async fn render(&self) -> String {
        let rows = self.snapshot().await;
        if rows.is_empty() {
            return "No model calls yet.".to_string();
        }

        let mut out = String::from("Usage since start:\n");
        for (id, u) in &rows {
            out.push_str(&format!(
                "{id}: {} calls, {} in / {} out tokens, {} errors\n",
                u.calls, u.input_tokens, u.output_tokens, u.errors
            ));
        }
        let total = self.aggregate().await;
        out.push_str(&format!(
            "Total: {} calls, {} tokens",
            total.calls,
            total.input_tokens + total.output_tokens
        ));
        out
    }
}
