use omniagent_core::config::SettingsSnapshot;
use omniagent_core::{Error, Result};

use crate::{AnthropicProvider, GeminiProvider, OllamaProvider, OpenAIProvider, Provider};

/// Build the decision-step provider from a settings snapshot. Called per
/// decision so a settings update takes effect on the next iteration without
/// touching an in-flight call.
pub fn create_provider(snapshot: &SettingsSnapshot) -> Result<Box<dyn Provider>> {
    let provider = &snapshot.settings.provider;
    let api_base = provider.api_base.as_deref();
    let model = provider.model.as_deref();

    match provider.name.as_str() {
        "gemini" => {
            let key = provider
                .api_key("gemini")
                .ok_or_else(|| Error::Config("Gemini API key is missing.".to_string()))?;
            Ok(Box::new(GeminiProvider::new(key, api_base, model)))
        }
        "openai" => {
            let key = provider
                .api_key("openai")
                .ok_or_else(|| Error::Config("OpenAI API key is missing.".to_string()))?;
            Ok(Box::new(OpenAIProvider::new(key, api_base, model)))
        }
        "anthropic" => {
            let key = provider
                .api_key("anthropic")
                .ok_or_else(|| Error::Config("Anthropic API key is missing.".to_string()))?;
            Ok(Box::new(AnthropicProvider::new(key, api_base, model)))
        }
        "ollama" => Ok(Box::new(OllamaProvider::new(
            &provider.ollama_endpoint,
            &provider.ollama_model,
        ))),
        other => Err(Error::Config(format!("Unknown provider: {}", other))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use omniagent_core::Settings;
    use std::sync::Arc;

    fn snapshot(settings: Settings) -> Arc<SettingsSnapshot> {
        Arc::new(SettingsSnapshot {
            version: 1,
            settings,
        })
    }

    #[test]
    fn missing_key_is_a_config_error() {
        let err = create_provider(&snapshot(Settings::default())).err().unwrap();
        assert!(err.to_string().contains("Gemini API key is missing."));
    }

    #[test]
    fn ollama_needs_no_key() {
        let mut settings = Settings::default();
        settings.provider.name = "ollama".to_string();
        let provider = create_provider(&snapshot(settings)).unwrap();
        assert_eq!(provider.name(), "ollama");
    }

    #[test]
    fn unknown_provider_is_rejected() {
        let mut settings = Settings::default();
        settings.provider.name = "mystery".to_string();
        assert!(create_provider(&snapshot(settings)).is_err());
    }
}
