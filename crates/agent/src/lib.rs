pub mod approval;
pub mod gate;
pub mod prompt;
pub mod runtime;

pub use approval::{ApprovalRequest, ApprovalSlot, ApprovalTicket, ApprovalWait};
pub use gate::should_block;
pub use runtime::{AgentRuntime, DecisionStep, LiveDecisionStep, RuntimeChannels, Shell};
