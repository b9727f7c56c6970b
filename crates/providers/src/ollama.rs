use async_trait::async_trait;
use omniagent_core::{Error, Result};
use reqwest::Client;
use serde_json::{json, Value};

use crate::Provider;

/// Local Ollama endpoint; takes the full generate URL so non-default hosts
/// and ports need no special casing.
pub struct OllamaProvider {
    client: Client,
    endpoint: String,
    model: String,
}

impl OllamaProvider {
    pub fn new(endpoint: &str, model: &str) -> Self {
        Self {
            client: Client::new(),
            endpoint: endpoint.to_string(),
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &'static str {
        "ollama"
    }

    async fn complete(&self, prompt: &str) -> Result<String> {
        let body = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "format": "json"
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Provider(format!("Ollama request failed: {}", e)))?;

        if !response.status().is_success() {
            return Err(Error::Provider(format!(
                "Ollama error: {}",
                response.status()
            )));
        }

        let data: Value = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("Ollama response parse failed: {}", e)))?;
        data.get("response")
            .and_then(|r| r.as_str())
            .map(String::from)
            .ok_or_else(|| Error::Provider("Ollama response has no response field".to_string()))
    }
}
