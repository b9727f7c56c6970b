use async_trait::async_trait;
use omniagent_core::{Error, Result};
use reqwest::Client;
use serde_json::{json, Value};

use crate::Provider;

const ANTHROPIC_API_BASE: &str = "https://api.anthropic.com";
const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const MAX_TOKENS: u32 = 4096;

pub struct AnthropicProvider {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
}

impl AnthropicProvider {
    pub fn new(api_key: &str, api_base: Option<&str>, model: Option<&str>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            api_base: api_base
                .unwrap_or(ANTHROPIC_API_BASE)
                .trim_end_matches('/')
                .to_string(),
            model: model.unwrap_or(DEFAULT_MODEL).to_string(),
        }
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn name(&self) -> &'static str {
        "anthropic"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/v1/messages", self.api_base);
        let body = json!({
            "model": self.model,
            "max_tokens": MAX_TOKENS,
            "messages": [{ "role": "user", "content": prompt }]
        });

        let response = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("Anthropic request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(Error::Provider(format!(
                "Anthropic API error ({}): {}",
                status, error_body
            )));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("Anthropic response parse failed: {}", e)))?;
        data.pointer("/content/0/text")
            .and_then(|t| t.as_str())
            .map(String::from)
            .ok_or_else(|| Error::Provider("Anthropic response has no text block".to_string()))
    }
}
