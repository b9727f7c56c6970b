pub mod config;
pub mod error;
pub mod message;
pub mod paths;
pub mod types;

pub use config::{Settings, SettingsSnapshot, SettingsStore};
pub use error::{Error, Result};
pub use message::PanelEvent;
pub use paths::Paths;
pub use types::{
    Action, ActionKind, AutonomyMode, Conversation, Decision, ElementId, ExecOutcome, MemorySave,
    Message, RiskLevel, Role,
};
