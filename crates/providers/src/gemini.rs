use async_trait::async_trait;
use omniagent_core::{Error, Result};
use reqwest::Client;
use serde_json::{json, Value};
use tracing::debug;

use crate::Provider;

const GEMINI_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
const DEFAULT_MODEL: &str = "gemini-3-flash-preview";

pub struct GeminiProvider {
    client: Client,
    api_key: String,
    api_base: String,
    model: String,
}

impl GeminiProvider {
    pub fn new(api_key: &str, api_base: Option<&str>, model: Option<&str>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.to_string(),
            api_base: api_base
                .unwrap_or(GEMINI_API_BASE)
                .trim_end_matches('/')
                .to_string(),
            model: model.unwrap_or(DEFAULT_MODEL).to_string(),
        }
    }
}

#[async_trait]
impl Provider for GeminiProvider {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.api_base, self.model, self.api_key
        );

        let body = json!({
            "contents": [{ "parts": [{ "text": prompt }] }],
            // Force JSON mode; the decision contract is a single JSON object.
            "generationConfig": { "response_mime_type": "application/json" }
        });

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("Gemini request failed: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            return Err(Error::Provider(format!(
                "Gemini API error ({}): {}",
                status, error_body
            )));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("Gemini response parse failed: {}", e)))?;
        debug!(model = %self.model, "Gemini response received");
        extract_text(&data)
    }
}

fn extract_text(data: &Value) -> Result<String> {
    data.pointer("/candidates/0/content/parts/0/text")
        .and_then(|t| t.as_str())
        .map(String::from)
        .ok_or_else(|| Error::Provider("Gemini response has no text candidate".to_string()))
}
