//! Publishing long responses as standalone pages.

use async_trait::async_trait;
use parley_core::{truncate_chars, ParleyError, ParleyResult};
use serde::Deserialize;
use serde_json::{json, Value};
use tokio::sync::OnceCell;
use tracing::info;

const TELEGRAPH_API: &str = "https://api.telegra.ph";
const SHORT_NAME: &str = "Parley";
const DEFAULT_AUTHOR: &str = "Parley Bot";
const MAX_TITLE_CHARS: usize = 256;

/// Something that turns a long text into a public URL.
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `content` under `title` and return the page URL.
    async fn publish(&self, title: &str, content: &str, author: &str) -> ParleyResult<String>;
}

/// [Telegraph](https://telegra.ph) publisher.
///
/// Creates an anonymous account on first use and reuses its token.
pub struct TelegraphPublisher {
    api_base: String,
    client: reqwest::Client,
    token: OnceCell<String>,
}

#[derive(Debug, Deserialize)]
struct TelegraphResponse<T> {
    ok: bool,
    #[serde(default)]
    error: Option<String>,
    result: Option<T>,
}

#[derive(Debug, Deserialize)]
struct Account {
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct Page {
    url: String,
}

impl TelegraphPublisher {
    pub fn new() -> Self {
        Self {
            api_base: TELEGRAPH_API.to_string(),
            client: reqwest::Client::new(),
            token: OnceCell::new(),
        }
    }

    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into().trim_end_matches('/').to_string();
        self
    }

    async fn token(&self) -> ParleyResult<&str> {
        let token = self
            .token
            .get_or_try_init(|| async {
                let account: Account = self
                    .call(
                        "createAccount",
                        json!({ "short_name": SHORT_NAME, "author_name": DEFAULT_AUTHOR }),
                    )
                    .await?;
                Ok::<_, ParleyError>(account.access_token)
            })
            .await?;
        Ok(token.as_str())
    }

    async fn call<T: serde::de::DeserializeOwned>(&self, method: &str, body: Value) -> ParleyResult<T> {
        let resp = self
            .client
            .post(format!("{}/{}", self.api_base, method))
            .json(&body)
            .send()
            .await
            .map_err(|e| ParleyError::Channel(format!("Telegraph {method} error: {e}")))?;

        let body: TelegraphResponse<T> = resp
            .json()
            .await
            .map_err(|e| ParleyError::Channel(format!("Telegraph parse error: {e}")))?;

        match (body.ok, body.result) {
            (true, Some(result)) => Ok(result),
            _ => Err(ParleyError::Channel(format!(
                "Telegraph {method} failed: {}",
                body.error.unwrap_or_else(|| "no result".into())
            ))),
        }
    }
}

impl Default for TelegraphPublisher {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Publisher for TelegraphPublisher {
    async fn publish(&self, title: &str, content: &str, author: &str) -> ParleyResult<String> {
        let token = self.token().await?;
        let author = if author.is_empty() { DEFAULT_AUTHOR } else { author };
        let page: Page = self
            .call(
                "createPage",
                json!({
                    "access_token": token,
                    "title": truncate_chars(title, MAX_TITLE_CHARS),
                    "author_name": author,
                    "content": to_nodes(content),
                    "return_content": false,
                }),
            )
            .await?;
        info!(url = %page.url, chars = content.chars().count(), "Published to Telegraph");
        Ok(page.url)
    }
}

/// Telegraph DOM nodes: fenced code as `pre`, blank-line separated
/// paragraphs as `p` with `br` between lines.
pub fn to_nodes(content: &str) -> Vec<Value> {
    let mut nodes = Vec::new();
    for (i, segment) in content.split("```").enumerate() {
        if i % 2 == 1 {
            // Drop the language tag on the fence line.
            let code = match segment.split_once('\n') {
                Some((first, rest)) if !first.contains(' ') => rest,
                _ => segment,
            };
            nodes.push(json!({ "tag": "pre", "children": [code.trim_end_matches('\n')] }));
            continue;
        }
        for para in segment.split("\n\n").map(str::trim).filter(|p| !p.is_empty()) {
            let mut children = Vec::new();
            for (j, line) in para.lines().enumerate() {
                if j > 0 {
                    children.push(json!({ "tag": "br" }));
                }
                children.push(json!(line));
            }
            nodes.push(json!({ "tag": "p", "children": children }));
        }
    }
    nodes
}
