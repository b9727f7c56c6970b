pub mod anthropic;
pub mod factory;
pub mod gemini;
pub mod ollama;
pub mod openai;

use async_trait::async_trait;
use omniagent_core::Result;

pub use anthropic::AnthropicProvider;
pub use factory::create_provider;
pub use gemini::GeminiProvider;
pub use ollama::OllamaProvider;
pub use openai::OpenAIProvider;

/// The decision step's transport: send one assembled prompt, get back the
/// model's raw text. Structured-decision parsing happens in core, so a
/// provider is nothing but wire format.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &'static str;
    async fn complete(&self, prompt: &str) -> Result<String>;
}
