use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

use crate::error::{Error, Result};

/// Numeric id assigned to a page element by one perception scan.
/// Ids are only meaningful for the scan that produced them.
pub type ElementId = u32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
        }
    }
}

/// Policy tier controlling how much risk is tolerated without human approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum AutonomyMode {
    #[default]
    Manual,
    Semi,
    Auto,
}

impl AutonomyMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            AutonomyMode::Manual => "manual",
            AutonomyMode::Semi => "semi",
            AutonomyMode::Auto => "auto",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "manual" => Some(AutonomyMode::Manual),
            "semi" => Some(AutonomyMode::Semi),
            "auto" => Some(AutonomyMode::Auto),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Click,
    Type,
    Scroll,
    Navigate,
    OpenTab,
    Extract,
    Done,
    SaveMemory,
    Wait,
    CreatePlan,
    ToolCall,
}

impl ActionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::Click => "CLICK",
            ActionKind::Type => "TYPE",
            ActionKind::Scroll => "SCROLL",
            ActionKind::Navigate => "NAVIGATE",
            ActionKind::OpenTab => "OPEN_TAB",
            ActionKind::Extract => "EXTRACT",
            ActionKind::Done => "DONE",
            ActionKind::SaveMemory => "SAVE_MEMORY",
            ActionKind::Wait => "WAIT",
            ActionKind::CreatePlan => "CREATE_PLAN",
            ActionKind::ToolCall => "TOOL_CALL",
        }
    }
}

/// A memory write decoded from a SAVE_MEMORY action's value payload.
#[derive(Debug, Clone, PartialEq)]
pub struct MemorySave {
    pub key: String,
    pub value: Value,
}

/// One structured action issued by the decision step.
///
/// Kind-dependent fields are part of the variant, so an action missing a
/// required field for its kind cannot be constructed: the wire decode in
/// [`Decision::parse`] rejects it instead.
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Click {
        target: ElementId,
    },
    Type {
        target: ElementId,
        text: String,
    },
    Scroll,
    Navigate {
        url: String,
    },
    OpenTab {
        url: String,
    },
    Extract,
    Done,
    /// A malformed payload is tolerated (`None`): the save is dropped with a
    /// log line but the decision's message still applies.
    SaveMemory {
        payload: Option<MemorySave>,
    },
    Wait,
    CreatePlan {
        plan: String,
    },
    ToolCall {
        source: String,
        tool: String,
        args: Value,
    },
}

impl Action {
    pub fn kind(&self) -> ActionKind {
        match self {
            Action::Click { .. } => ActionKind::Click,
            Action::Type { .. } => ActionKind::Type,
            Action::Scroll => ActionKind::Scroll,
            Action::Navigate { .. } => ActionKind::Navigate,
            Action::OpenTab { .. } => ActionKind::OpenTab,
            Action::Extract => ActionKind::Extract,
            Action::Done => ActionKind::Done,
            Action::SaveMemory { .. } => ActionKind::SaveMemory,
            Action::Wait => ActionKind::Wait,
            Action::CreatePlan { .. } => ActionKind::CreatePlan,
            Action::ToolCall { .. } => ActionKind::ToolCall,
        }
    }

    pub fn target(&self) -> Option<ElementId> {
        match self {
            Action::Click { target } | Action::Type { target, .. } => Some(*target),
            _ => None,
        }
    }
}

/// Result of executing one action against the page surface.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecOutcome {
    pub fn ok() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
        }
    }

    pub fn with_data(data: String) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn fail(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}

/// Raw decision-step response shape, before kind validation.
#[derive(Debug, Deserialize)]
struct DecisionWire {
    #[serde(default)]
    thought: Option<String>,
    #[serde(default)]
    message: Option<String>,
    action: String,
    #[serde(default)]
    target_id: Option<ElementId>,
    #[serde(default)]
    value: Option<String>,
    #[serde(default)]
    risk_score: Option<RiskLevel>,
    #[serde(default)]
    new_title: Option<String>,
}

/// One parsed, validated decision from the LLM decision step.
#[derive(Debug, Clone)]
pub struct Decision {
    pub thought: String,
    pub message: Option<String>,
    pub action: Action,
    /// Absent means the model did not label the action; the risk gate
    /// defaults it to HIGH.
    pub risk: Option<RiskLevel>,
    pub new_title: Option<String>,
}

impl Decision {
    /// Parse the decision step's raw text into a validated decision.
    ///
    /// Code fencing is stripped before parsing. An unknown action kind or a
    /// missing required field for the kind is a decode error.
    pub fn parse(raw: &str) -> Result<Self> {
        let clean = strip_code_fences(raw);
        let wire: DecisionWire = serde_json::from_str(&clean)
            .map_err(|e| Error::Decision(format!("unparsable decision response: {}", e)))?;

        let action = decode_action(&wire)?;

        Ok(Decision {
            thought: wire.thought.unwrap_or_default(),
            message: wire.message,
            action,
            risk: wire.risk_score,
            new_title: wire.new_title,
        })
    }
}

fn strip_code_fences(raw: &str) -> String {
    raw.replace("```json", "").replace("```", "").trim().to_string()
}

fn decode_action(wire: &DecisionWire) -> Result<Action> {
    let require_target = || {
        wire.target_id.ok_or_else(|| {
            Error::Decision(format!("{} action is missing target_id", wire.action))
        })
    };
    let require_value = || {
        wire.value
            .as_deref()
            .filter(|v| !v.is_empty())
            .ok_or_else(|| Error::Decision(format!("{} action is missing value", wire.action)))
    };

    match wire.action.as_str() {
        "CLICK" => Ok(Action::Click {
            target: require_target()?,
        }),
        "TYPE" => Ok(Action::Type {
            target: require_target()?,
            text: require_value()?.to_string(),
        }),
        "SCROLL" => Ok(Action::Scroll),
        "NAVIGATE" => Ok(Action::Navigate {
            url: require_value()?.to_string(),
        }),
        "OPEN_TAB" => Ok(Action::OpenTab {
            url: require_value()?.to_string(),
        }),
        "EXTRACT" => Ok(Action::Extract),
        "DONE" => Ok(Action::Done),
        "SAVE_MEMORY" => Ok(Action::SaveMemory {
            payload: decode_memory_payload(wire.value.as_deref()),
        }),
        "WAIT" => Ok(Action::Wait),
        "CREATE_PLAN" => Ok(Action::CreatePlan {
            plan: require_value()?.to_string(),
        }),
        "TOOL_CALL" => decode_tool_call(require_value()?),
        other => Err(Error::Decision(format!("unknown action type: {}", other))),
    }
}

/// SAVE_MEMORY value is a JSON-encoded `{key, value}`. A bare object without
/// those fields is saved whole under the `general` key. Malformed JSON is
/// logged and dropped; the rest of the decision still applies.
fn decode_memory_payload(value: Option<&str>) -> Option<MemorySave> {
    let raw = value?;
    match serde_json::from_str::<Value>(raw) {
        Ok(data) => {
            let key = data
                .get("key")
                .and_then(|k| k.as_str())
                .unwrap_or("general")
                .to_string();
            let value = data.get("value").cloned().unwrap_or(data);
            Some(MemorySave { key, value })
        }
        Err(e) => {
            warn!(error = %e, "Malformed SAVE_MEMORY payload, dropping the save");
            None
        }
    }
}

/// TOOL_CALL value is a JSON-encoded `{tool, source, args}`.
fn decode_tool_call(value: &str) -> Result<Action> {
    let data: Value = serde_json::from_str(value)
        .map_err(|e| Error::Decision(format!("unparsable TOOL_CALL value: {}", e)))?;
    let tool = data
        .get("tool")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Decision("TOOL_CALL value is missing tool".to_string()))?
        .to_string();
    let source = data
        .get("source")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::Decision("TOOL_CALL value is missing source".to_string()))?
        .to_string();
    let args = data
        .get("args")
        .cloned()
        .unwrap_or(Value::Object(serde_json::Map::new()));
    Ok(Action::ToolCall { source, tool, args })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Agent,
    System,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn user(content: &str) -> Self {
        Self {
            role: Role::User,
            content: content.to_string(),
        }
    }

    pub fn agent(content: &str) -> Self {
        Self {
            role: Role::Agent,
            content: content.to_string(),
        }
    }

    pub fn system(content: &str) -> Self {
        Self {
            role: Role::System,
            content: content.to_string(),
        }
    }
}

pub const DEFAULT_CONVERSATION_TITLE: &str = "New Conversation";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub title: String,
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            title: DEFAULT_CONVERSATION_TITLE.to_string(),
            messages: Vec::new(),
        }
    }

    /// Append a message, suppressing adjacent duplicates (same role and
    /// content as the previous entry). Returns whether it was appended.
    pub fn push(&mut self, message: Message) -> bool {
        if self.messages.last() == Some(&message) {
            return false;
        }
        self.messages.push(message);
        true
    }

    /// Set the auto-assigned title; only takes effect while the conversation
    /// still carries the default title.
    pub fn set_title_once(&mut self, title: &str) -> bool {
        if self.title == DEFAULT_CONVERSATION_TITLE && !title.is_empty() {
            self.title = title.to_string();
            return true;
        }
        false
    }
}
