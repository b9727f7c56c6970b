use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use omniagent_core::config::{SettingsSnapshot, SettingsStore};
use omniagent_core::{
    Action, ActionKind, Conversation, Decision, Message, PanelEvent, Result, RiskLevel,
};
use omniagent_storage::{AgentMemory, ConversationStore};
use omniagent_surface::{ExecStatus, SurfaceError, SurfaceHandle, SurfaceInjector};
use omniagent_tools::McpManager;
use regex::Regex;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::approval::{ApprovalRequest, ApprovalSlot};
use crate::gate;
use crate::prompt::{build_prompt, PromptInputs};

/// Continuation sentinel for every iteration after the first.
pub const CONTINUE_INSTRUCTION: &str = "Continue achieving the goal.";

/// Synthetic context substituted when the active surface cannot be scanned,
/// steering the decision step towards navigating elsewhere instead of failing.
const RESTRICTED_CONTEXT: &str = "SYSTEM: Current page is a browser system page (New Tab/Settings). \
Visual elements are unavailable. If you need to search, use 'NAVIGATE' or 'OPEN_TAB' to go to a \
search engine like google.com.";

/// Schemes the surface collaborator cannot be injected into.
const RESTRICTED_PREFIXES: &[&str] = &["chrome://", "chrome-extension://", "edge://", "about:"];

/// The decision step: prompt in, raw model text out. The settings snapshot
/// is injected per call so configuration updates never mutate state under an
/// in-flight request.
#[async_trait]
pub trait DecisionStep: Send + Sync {
    async fn decide(&self, prompt: &str, settings: &SettingsSnapshot) -> Result<String>;
}

/// Production decision step: builds the configured provider from the
/// snapshot for each call.
pub struct LiveDecisionStep;

#[async_trait]
impl DecisionStep for LiveDecisionStep {
    async fn decide(&self, prompt: &str, settings: &SettingsSnapshot) -> Result<String> {
        let provider = omniagent_providers::create_provider(settings)?;
        provider.complete(prompt).await
    }
}

/// The browser-shell collaborator: owns tabs, so tab-level actions
/// (open tab, top-level navigation) and the active location live here.
#[async_trait]
pub trait Shell: Send + Sync {
    async fn active_location(&self) -> Option<String>;
    async fn open_tab(&self, url: &str) -> Result<()>;
    async fn navigate(&self, url: &str) -> Result<()>;
}

/// Channel ends wiring the loop to the user-facing panel.
pub struct RuntimeChannels {
    pub panel_tx: mpsc::Sender<PanelEvent>,
    pub approval_tx: mpsc::Sender<ApprovalRequest>,
    pub stop_rx: watch::Receiver<bool>,
}

enum Flow {
    /// Executed against the page; settle, then rescan.
    Continue,
    /// Loop-internal action; resume quickly.
    ContinueFast,
    Finished,
    Halt,
}

enum ContextResult {
    Context(String),
    RetryLater,
}

/// The orchestration loop: scan → think → risk check → (approval) → execute,
/// until DONE, a fatal error, or cancellation.
pub struct AgentRuntime {
    settings: Arc<SettingsStore>,
    decision: Arc<dyn DecisionStep>,
    injector: Arc<dyn SurfaceInjector>,
    shell: Arc<dyn Shell>,
    tools: Arc<McpManager>,
    store: ConversationStore,
    memory: AgentMemory,
    conversation: Conversation,
    surface: Option<SurfaceHandle>,
    channels: RuntimeChannels,
    /// Whether any externally visible interaction happened this run.
    interacted: bool,
}

impl AgentRuntime {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        settings: Arc<SettingsStore>,
        decision: Arc<dyn DecisionStep>,
        injector: Arc<dyn SurfaceInjector>,
        shell: Arc<dyn Shell>,
        tools: Arc<McpManager>,
        store: ConversationStore,
        conversation: Conversation,
        channels: RuntimeChannels,
    ) -> Self {
        Self {
            settings,
            decision,
            injector,
            shell,
            tools,
            store,
            memory: AgentMemory::new(),
            conversation,
            surface: None,
            channels,
            interacted: false,
        }
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn memory(&self) -> &AgentMemory {
        &self.memory
    }

    /// Run the loop for one instruction until a terminal state.
    pub async fn run(&mut self, instruction: &str) -> Result<()> {
        self.record(Message::user(instruction)).await;
        let mut next_instruction = Some(instruction.to_string());

        loop {
            // Cancellation is cooperative, observed once per iteration.
            if *self.channels.stop_rx.borrow() {
                self.record(Message::agent("Stopped by user.")).await;
                break;
            }

            let agent_cfg = self.settings.current().settings.agent.clone();

            self.status("Scanning page...").await;
            let context = match self.obtain_context().await {
                ContextResult::Context(ctx) => ctx,
                ContextResult::RetryLater => {
                    tokio::time::sleep(Duration::from_millis(agent_cfg.scan_retry_delay_ms)).await;
                    continue;
                }
            };

            self.status("Thinking...").await;
            let snapshot = self.settings.current();
            let catalog = self.tools.all_tools().await;
            let instruction_text = next_instruction
                .take()
                .unwrap_or_else(|| CONTINUE_INSTRUCTION.to_string());
            let memory_snapshot = self.memory.snapshot();
            let prompt = build_prompt(&PromptInputs {
                instruction: &instruction_text,
                history: &self.conversation.messages,
                memory: &memory_snapshot,
                tools: &catalog,
                context: &context,
            });

            // A failed or unparsable decision is terminal: repeating an
            // ill-formed prompt rarely self-corrects.
            let raw = match self.decision.decide(&prompt, &snapshot).await {
                Ok(raw) => raw,
                Err(e) => {
                    self.record(Message::agent(&format!("Error: {}", e))).await;
                    break;
                }
            };
            let decision = match Decision::parse(&raw) {
                Ok(d) => d,
                Err(e) => {
                    self.record(Message::agent(&format!("Error: {}", e))).await;
                    break;
                }
            };

            if let Some(title) = &decision.new_title {
                if self.conversation.set_title_once(title) {
                    info!(title = %title, "conversation titled");
                }
            }
            if !decision.thought.is_empty() {
                self.record(Message::agent(&format!("Thought: {}", decision.thought)))
                    .await;
            }
            // SAVE_MEMORY handles its own messaging at execution: a usable
            // payload synthesizes a confirmation, a dropped one falls back
            // to the decision's message.
            if decision.action.kind() != ActionKind::SaveMemory {
                if let Some(message) = &decision.message {
                    self.record(Message::agent(message)).await;
                }
            }

            let blocked = gate::should_block(
                decision.action.kind(),
                decision.risk,
                snapshot.settings.autonomy,
            );
            if blocked {
                if !self.await_approval(&decision, &context).await {
                    self.record(Message::user("I rejected that action")).await;
                    self.record(Message::agent("Action rejected.")).await;
                    continue;
                }
                self.record(Message::agent("Action approved. Executing...")).await;
            }

            let flow = self.execute(&decision, &context).await;
            self.persist();

            match flow {
                Flow::Continue => {
                    tokio::time::sleep(Duration::from_millis(agent_cfg.post_action_delay_ms)).await;
                }
                Flow::ContinueFast => {
                    tokio::time::sleep(Duration::from_millis(agent_cfg.fast_resume_delay_ms)).await;
                }
                Flow::Finished => {
                    // A DONE with no prior interaction never started anything,
                    // so there is nothing to announce as completed.
                    if self.interacted {
                        self.record(Message::agent("Task completed.")).await;
                    }
                    break;
                }
                Flow::Halt => break,
            }
        }

        self.persist();
        let _ = self.channels.panel_tx.send(PanelEvent::RunFinished).await;
        Ok(())
    }

    /// SCANNING state: synthetic context on restricted surfaces, one
    /// re-injection + one retry on a missing collaborator, otherwise wait
    /// and retry the whole iteration.
    async fn obtain_context(&mut self) -> ContextResult {
        let location = self.shell.active_location().await;
        let restricted = match &location {
            None => true,
            Some(url) => {
                url.is_empty() || RESTRICTED_PREFIXES.iter().any(|p| url.starts_with(p))
            }
        };
        if restricted {
            debug!(?location, "restricted surface, substituting synthetic context");
            return ContextResult::Context(RESTRICTED_CONTEXT.to_string());
        }

        match self.scan_once().await {
            Ok(ctx) if !ctx.trim().is_empty() => ContextResult::Context(ctx),
            Ok(_) => {
                debug!("empty context, page may be mid-navigation");
                ContextResult::RetryLater
            }
            Err(_) => {
                debug!("surface unreachable, re-injecting collaborator");
                match self.injector.inject().await {
                    Ok(handle) => {
                        self.surface = Some(handle);
                        match self.scan_once().await {
                            Ok(ctx) if !ctx.trim().is_empty() => ContextResult::Context(ctx),
                            _ => ContextResult::RetryLater,
                        }
                    }
                    Err(_) => ContextResult::RetryLater,
                }
            }
        }
    }

    async fn scan_once(&mut self) -> std::result::Result<String, SurfaceError> {
        let handle = match &self.surface {
            Some(handle) => handle.clone(),
            None => {
                let handle = self.injector.inject().await?;
                self.surface = Some(handle.clone());
                handle
            }
        };
        handle.context().await
    }

    /// Arm the one-shot slot, then present the choice. Exactly one of
    /// approve/reject resolves it; a closed panel rejects.
    async fn await_approval(&mut self, decision: &Decision, context: &str) -> bool {
        let risk = decision.risk.unwrap_or(RiskLevel::High);
        let summary = describe_action(&decision.action, context);
        let (ticket, wait) = ApprovalSlot::arm();

        if self
            .channels
            .approval_tx
            .send(ApprovalRequest {
                summary,
                risk,
                ticket,
            })
            .await
            .is_err()
        {
            warn!("no panel to present approval, rejecting");
            return false;
        }
        wait.wait().await
    }

    /// EXECUTING state: dispatch to the surface executor, the tool client,
    /// or loop-local handling.
    async fn execute(&mut self, decision: &Decision, context: &str) -> Flow {
        let agent_cfg = self.settings.current().settings.agent.clone();

        match &decision.action {
            Action::Done => {
                if let Some(surface) = &self.surface {
                    let _ = surface.clear_overlays().await;
                }
                Flow::Finished
            }
            Action::OpenTab { url } => {
                self.record(Message::agent(&format!("Opening new tab: {}", url)))
                    .await;
                match self.shell.open_tab(url).await {
                    Ok(()) => {
                        self.interacted = true;
                        Flow::Continue
                    }
                    Err(e) => {
                        self.record(Message::agent(&format!("Error: {}", e))).await;
                        Flow::Halt
                    }
                }
            }
            Action::Navigate { url } => {
                self.record(Message::agent(&format!("Navigating to {}...", url)))
                    .await;
                match self.shell.navigate(url).await {
                    Ok(()) => {
                        // The page context is replaced; the old collaborator
                        // is gone with it.
                        self.surface = None;
                        self.interacted = true;
                        Flow::Continue
                    }
                    Err(e) => {
                        self.record(Message::agent(&format!("Error: {}", e))).await;
                        Flow::Halt
                    }
                }
            }
            Action::SaveMemory { payload } => {
                match payload {
                    Some(save) => {
                        let count = self.memory.save(&save.key, save.value.clone());
                        let pretty =
                            serde_json::to_string_pretty(&save.value).unwrap_or_default();
                        let confirmation = if matches!(save.value, Value::Array(_)) {
                            format!(
                                "Batch saved {} items to memory:\n```json\n{}\n```",
                                count, pretty
                            )
                        } else {
                            format!("Saved to memory:\n```json\n{}\n```", pretty)
                        };
                        self.record(Message::agent(&confirmation)).await;
                    }
                    // Malformed payload: the save is dropped, but the rest of
                    // the decision still applies, including its message.
                    None => {
                        warn!("SAVE_MEMORY carried no usable payload");
                        if let Some(message) = &decision.message {
                            self.record(Message::agent(message)).await;
                        }
                    }
                }
                Flow::ContinueFast
            }
            Action::Wait => {
                tokio::time::sleep(Duration::from_millis(agent_cfg.wait_delay_ms)).await;
                Flow::ContinueFast
            }
            Action::CreatePlan { plan } => {
                self.memory.save("plan", Value::String(plan.clone()));
                self.record(Message::agent(&format!("Plan:\n{}", plan))).await;
                Flow::ContinueFast
            }
            Action::ToolCall { source, tool, args } => {
                self.status("Calling tool...").await;
                match self.tools.call_tool(source, tool, args.clone()).await {
                    Ok(result) => {
                        let pretty = serde_json::to_string_pretty(&result).unwrap_or_default();
                        self.record(Message::agent(&format!(
                            "Tool {} returned:\n```json\n{}\n```",
                            tool, pretty
                        )))
                        .await;
                        self.interacted = true;
                    }
                    // Tool failures are the call's result, not the loop's.
                    Err(e) => {
                        self.record(Message::agent(&format!("Tool {} failed: {}", tool, e)))
                            .await;
                    }
                }
                Flow::Continue
            }
            action => self.execute_on_surface(action, context, &agent_cfg).await,
        }
    }

    async fn execute_on_surface(
        &mut self,
        action: &Action,
        context: &str,
        agent_cfg: &omniagent_core::config::AgentDefaults,
    ) -> Flow {
        self.record(Message::agent(&describe_action(action, context)))
            .await;

        let status = match self.send_to_surface(action.clone()).await {
            Ok(status) => status,
            Err(_) => {
                self.record(Message::agent(
                    "Could not execute action on page. The tab might be closed or busy.",
                ))
                .await;
                return Flow::Halt;
            }
        };

        match status {
            ExecStatus::Navigated => {
                // Structured navigation signal from the collaborator: the
                // action tore the page down, which means it worked.
                debug!("navigation disconnect, treating as success");
                self.surface = None;
                self.interacted = true;
                Flow::Continue
            }
            ExecStatus::Completed(outcome) => {
                if outcome.success {
                    if action.kind() == ActionKind::Extract {
                        if let Some(data) = outcome.data {
                            let excerpt: String =
                                data.chars().take(agent_cfg.extract_excerpt_chars).collect();
                            self.record(Message::system(&format!(
                                "Extracted page text:\n{}",
                                excerpt
                            )))
                            .await;
                        }
                    } else {
                        self.interacted = true;
                    }
                    Flow::Continue
                } else {
                    // Fatal for this action only; the next scan gives the
                    // decision step a fresh target.
                    self.record(Message::agent(&format!(
                        "Action failed: {}",
                        outcome.error.unwrap_or_else(|| "unknown error".to_string())
                    )))
                    .await;
                    Flow::Continue
                }
            }
        }
    }

    /// One re-injection and one retry on a lost collaborator. Navigation
    /// tear-down arrives as a structured status, never through this path.
    async fn send_to_surface(
        &mut self,
        action: Action,
    ) -> std::result::Result<ExecStatus, SurfaceError> {
        let Some(handle) = self.surface.clone() else {
            return Err(SurfaceError::Unreachable);
        };
        match handle.execute(action.clone()).await {
            Ok(status) => Ok(status),
            Err(_) => {
                debug!("connection lost mid-action, re-injecting collaborator");
                let fresh = self.injector.inject().await?;
                self.surface = Some(fresh.clone());
                fresh.execute(action).await
            }
        }
    }

    async fn record(&mut self, message: Message) {
        let role = message.role;
        let content = message.content.clone();
        if self.conversation.push(message) {
            let _ = self
                .channels
                .panel_tx
                .send(PanelEvent::Message { role, content })
                .await;
        }
    }

    async fn status(&self, text: &str) {
        let _ = self
            .channels
            .panel_tx
            .send(PanelEvent::Status {
                text: text.to_string(),
            })
            .await;
    }

    fn persist(&self) {
        if let Err(e) = self.store.save(&self.conversation) {
            warn!(error = %e, "failed to persist conversation");
        }
    }
}

/// Human-readable line for what the agent is about to do, resolving element
/// labels from the scan context where possible.
fn describe_action(action: &Action, context: &str) -> String {
    match action {
        Action::Type { text, .. } => format!("Typing \"{}\"...", text),
        Action::Navigate { url } => format!("Navigating to {}...", url),
        Action::OpenTab { url } => format!("Opening new tab: {}", url),
        Action::ToolCall { source, tool, .. } => {
            format!("Calling tool {} on {}...", tool, source)
        }
        Action::Click { target } => match context_label(context, *target) {
            Some(label) => format!("Clicking \"{}\"...", label),
            None => format!("Clicking element [{}]...", target),
        },
        other => format!("Executing {}...", other.kind().as_str()),
    }
}

fn context_label(context: &str, id: u32) -> Option<String> {
    let pattern = format!(r#"\[ID: {}\] <.*?> "(.*?)""#, id);
    let re = Regex::new(&pattern).ok()?;
    re.captures(context)?.get(1).map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn describe_click_resolves_label_from_context() {
        let context = "[ID: 1] <button> \"Search\"\n[ID: 2] <a href=\"x\"> \"Details\"";
        assert_eq!(
            describe_action(&Action::Click { target: 2 }, context),
            "Clicking \"Details\"..."
        );
        assert_eq!(
            describe_action(&Action::Click { target: 7 }, context),
            "Clicking element [7]..."
        );
    }

    #[test]
    fn describe_type_quotes_text() {
        assert_eq!(
            describe_action(
                &Action::Type {
                    target: 1,
                    text: "rust".to_string()
                },
                ""
            ),
            "Typing \"rust\"..."
        );
    }
}
