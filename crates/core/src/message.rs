use serde::{Deserialize, Serialize};

use crate::types::Role;

/// Event delivered from the orchestration loop to the user-facing panel.
///
/// The panel runs in its own execution context; it never shares state with
/// the loop and only ever observes these discrete messages. Approval
/// requests travel on their own channel since they carry a resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PanelEvent {
    /// A chat line that is also part of the persisted conversation.
    Message { role: Role, content: String },
    /// Ephemeral progress line ("Scanning page...", "Thinking..."); shown
    /// but not persisted.
    Status { text: String },
    /// The run reached a terminal state.
    RunFinished,
}
