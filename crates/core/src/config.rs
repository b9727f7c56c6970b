use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use crate::error::Result;
use crate::paths::Paths;
use crate::types::AutonomyMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProviderSettings {
    #[serde(default = "default_provider_name")]
    pub name: String,
    /// Provider name → API key.
    #[serde(default)]
    pub api_keys: HashMap<String, String>,
    #[serde(default)]
    pub api_base: Option<String>,
    /// Model override; each provider has its own default.
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_ollama_endpoint")]
    pub ollama_endpoint: String,
    #[serde(default = "default_ollama_model")]
    pub ollama_model: String,
}

fn default_provider_name() -> String {
    "gemini".to_string()
}

fn default_ollama_endpoint() -> String {
    "http://localhost:11434/api/generate".to_string()
}

fn default_ollama_model() -> String {
    "llama3".to_string()
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            name: default_provider_name(),
            api_keys: HashMap::new(),
            api_base: None,
            model: None,
            ollama_endpoint: default_ollama_endpoint(),
            ollama_model: default_ollama_model(),
        }
    }
}

impl ProviderSettings {
    pub fn api_key(&self, provider: &str) -> Option<&str> {
        self.api_keys
            .get(provider)
            .map(|s| s.as_str())
            .filter(|s| !s.is_empty())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentDefaults {
    /// Delay before retrying an iteration whose scan produced nothing.
    #[serde(default = "default_scan_retry_delay_ms")]
    pub scan_retry_delay_ms: u64,
    /// Delay between an executed action and the next scan.
    #[serde(default = "default_post_action_delay_ms")]
    pub post_action_delay_ms: u64,
    /// Delay after loop-internal actions (memory save, plan) that touch no page.
    #[serde(default = "default_fast_resume_delay_ms")]
    pub fast_resume_delay_ms: u64,
    /// Settle delay the executor imposes after any mutating page action.
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,
    /// Sleep performed by a WAIT action.
    #[serde(default = "default_wait_delay_ms")]
    pub wait_delay_ms: u64,
    /// Timeout for one request to the surface collaborator.
    #[serde(default = "default_surface_timeout_ms")]
    pub surface_timeout_ms: u64,
    /// Timeout for one correlated remote tool call.
    #[serde(default = "default_rpc_timeout_secs")]
    pub rpc_timeout_secs: u64,
    /// Cap on extracted page text appended to the conversation.
    #[serde(default = "default_extract_excerpt_chars")]
    pub extract_excerpt_chars: usize,
}

fn default_scan_retry_delay_ms() -> u64 {
    2000
}

fn default_post_action_delay_ms() -> u64 {
    3000
}

fn default_fast_resume_delay_ms() -> u64 {
    100
}

fn default_settle_delay_ms() -> u64 {
    1000
}

fn default_wait_delay_ms() -> u64 {
    2000
}

fn default_surface_timeout_ms() -> u64 {
    5000
}

fn default_rpc_timeout_secs() -> u64 {
    10
}

fn default_extract_excerpt_chars() -> usize {
    4000
}

impl Default for AgentDefaults {
    fn default() -> Self {
        Self {
            scan_retry_delay_ms: default_scan_retry_delay_ms(),
            post_action_delay_ms: default_post_action_delay_ms(),
            fast_resume_delay_ms: default_fast_resume_delay_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            wait_delay_ms: default_wait_delay_ms(),
            surface_timeout_ms: default_surface_timeout_ms(),
            rpc_timeout_secs: default_rpc_timeout_secs(),
            extract_excerpt_chars: default_extract_excerpt_chars(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolServerConfig {
    pub name: String,
    /// SSE endpoint of the tool server.
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    #[serde(default)]
    pub provider: ProviderSettings,
    #[serde(default)]
    pub autonomy: AutonomyMode,
    #[serde(default)]
    pub agent: AgentDefaults,
    #[serde(default)]
    pub tool_servers: Vec<ToolServerConfig>,
}

impl Settings {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = serde_json::from_str(&content)?;
        Ok(settings)
    }

    pub fn load_or_default(paths: &Paths) -> Result<Self> {
        let config_path = paths.config_file();
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, content)?;
        Ok(())
    }
}

/// An immutable, versioned view of the settings, injected into each
/// decision-step call. Updates publish a new snapshot; a snapshot held by an
/// in-flight call never changes underneath it.
#[derive(Debug, Clone)]
pub struct SettingsSnapshot {
    pub version: u64,
    pub settings: Settings,
}

pub struct SettingsStore {
    current: RwLock<Arc<SettingsSnapshot>>,
}

impl SettingsStore {
    pub fn new(settings: Settings) -> Self {
        Self {
            current: RwLock::new(Arc::new(SettingsSnapshot {
                version: 1,
                settings,
            })),
        }
    }

    pub fn current(&self) -> Arc<SettingsSnapshot> {
        self.current.read().expect("settings lock poisoned").clone()
    }

    /// Publish new settings as the next snapshot version.
    pub fn update(&self, settings: Settings) -> Arc<SettingsSnapshot> {
        let mut guard = self.current.write().expect("settings lock poisoned");
        let next = Arc::new(SettingsSnapshot {
            version: guard.version + 1,
            settings,
        });
        *guard = next.clone();
        next
    }
}
