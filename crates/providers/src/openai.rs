use async_trait::async_trait;
use omniagent_core::{Error, Result};
use reqwest::Client;
use serde_json::{json, Value};

use crate::Provider;

const OPENAI_API_BASE: &str = "https://api.openai.com/v1";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

pub struct OpenAIProvider {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
}

impl OpenAIProvider {
    pub fn new(api_key: &str, api_base: Option<&str>, model: Option<&str>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            api_base: api_base
                .unwrap_or(OPENAI_API_BASE)
                .trim_end_matches('/')
                .to_string(),
            model: model.unwrap_or(DEFAULT_MODEL).to_string(),
        }
    }
}

#[async_trait]
impl Provider for OpenAIProvider {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.api_base);
        let body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
            "response_format": { "type": "json_object" }
        });

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("OpenAI request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(Error::Provider(format!(
                "OpenAI API error ({}): {}",
                status, error_body
            )));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("OpenAI response parse failed: {}", e)))?;
        extract_content(&data)
    }
}

fn extract_content(data: &Value) -> Result<String> {
    data.pointer("/choices/0/message/content")
        .and_then(|c| c.as_str())
        .map(String::from)
        .ok_or_else(|| Error::Provider("OpenAI response has no message content".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_first_choice_content() {
        let data = serde_json::json!({
            "choices": [{ "message": { "role": "assistant", "content": "{}" } }]
        });
        assert_eq!(extract_content(&data).unwrap(), "{}");
    }
}
