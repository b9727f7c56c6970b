//! Drives the full orchestration loop against a fixture surface with a
//! scripted decision step: scan → think → gate → (approval) → execute.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use omniagent_agent::{AgentRuntime, ApprovalRequest, DecisionStep, RuntimeChannels, Shell};
use omniagent_core::config::{SettingsSnapshot, SettingsStore};
use omniagent_core::{AutonomyMode, Conversation, Error, Paths, Result, RiskLevel, Role, Settings};
use omniagent_storage::ConversationStore;
use omniagent_surface::{FixtureInjector, FixtureNode, FixturePage};
use omniagent_tools::McpManager;
use serde_json::json;
use tokio::sync::{mpsc, watch};

struct ScriptedDecisions {
    responses: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedDecisions {
    fn new(responses: Vec<String>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl DecisionStep for ScriptedDecisions {
    async fn decide(&self, prompt: &str, _settings: &SettingsSnapshot) -> Result<String> {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .ok_or_else(|| Error::Provider("decision script exhausted".to_string()))
    }
}

struct FakeShell {
    location: Mutex<String>,
    opened: Mutex<Vec<String>>,
}

impl FakeShell {
    fn new(location: &str) -> Self {
        Self {
            location: Mutex::new(location.to_string()),
            opened: Mutex::new(Vec::new()),
        }
    }

    fn opened(&self) -> Vec<String> {
        self.opened.lock().unwrap().clone()
    }
}

#[async_trait]
impl Shell for FakeShell {
    async fn active_location(&self) -> Option<String> {
        Some(self.location.lock().unwrap().clone())
    }

    async fn open_tab(&self, url: &str) -> Result<()> {
        self.opened.lock().unwrap().push(url.to_string());
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        *self.location.lock().unwrap() = url.to_string();
        Ok(())
    }
}

fn decision(action: &str, target: Option<u32>, value: Option<&str>, risk: &str) -> String {
    json!({
        "thought": "",
        "message": null,
        "action": action,
        "target_id": target,
        "value": value,
        "risk_score": risk,
        "new_title": null
    })
    .to_string()
}

struct Harness {
    runtime: AgentRuntime,
    page: FixturePage,
    shell: Arc<FakeShell>,
    decisions: Arc<ScriptedDecisions>,
    approvals: Arc<Mutex<Vec<(String, RiskLevel)>>>,
    stop_tx: watch::Sender<bool>,
    base: std::path::PathBuf,
}

impl Harness {
    fn build(
        page: FixturePage,
        autonomy: AutonomyMode,
        script: Vec<String>,
        approve: bool,
        shell_location: &str,
    ) -> Self {
        let mut settings = Settings::default();
        settings.autonomy = autonomy;
        settings.agent.scan_retry_delay_ms = 1;
        settings.agent.post_action_delay_ms = 0;
        settings.agent.fast_resume_delay_ms = 0;
        settings.agent.wait_delay_ms = 0;

        let base = std::env::temp_dir().join(format!("omniagent-loop-{}", uuid::Uuid::new_v4()));
        let paths = Paths::with_base(base.clone());
        paths.ensure_dirs().unwrap();

        let decisions = Arc::new(ScriptedDecisions::new(script));
        let shell = Arc::new(FakeShell::new(shell_location));
        let injector = Arc::new(FixtureInjector::new(
            page.clone(),
            Duration::ZERO,
            Duration::from_secs(2),
        ));

        let (panel_tx, mut panel_rx) = mpsc::channel(64);
        let (approval_tx, mut approval_rx) = mpsc::channel::<ApprovalRequest>(8);
        let (stop_tx, stop_rx) = watch::channel(false);

        // Panel context: drain display events.
        tokio::spawn(async move { while panel_rx.recv().await.is_some() {} });

        // Approval context: record and resolve each request.
        let approvals = Arc::new(Mutex::new(Vec::new()));
        let approvals_sink = approvals.clone();
        tokio::spawn(async move {
            while let Some(request) = approval_rx.recv().await {
                approvals_sink
                    .lock()
                    .unwrap()
                    .push((request.summary.clone(), request.risk));
                if approve {
                    request.ticket.approve();
                } else {
                    request.ticket.reject();
                }
            }
        });

        let runtime = AgentRuntime::new(
            Arc::new(SettingsStore::new(settings)),
            decisions.clone(),
            injector,
            shell.clone(),
            Arc::new(McpManager::new(Duration::from_secs(1))),
            ConversationStore::new(paths),
            Conversation::new("test"),
            RuntimeChannels {
                panel_tx,
                approval_tx,
                stop_rx,
            },
        );

        Self {
            runtime,
            page,
            shell,
            decisions,
            approvals,
            stop_tx,
            base,
        }
    }

    fn messages(&self) -> Vec<String> {
        self.runtime
            .conversation()
            .messages
            .iter()
            .map(|m| m.content.clone())
            .collect()
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        std::fs::remove_dir_all(&self.base).ok();
    }
}

fn button_page() -> FixturePage {
    let page = FixturePage::new("https://example.com");
    page.push(FixtureNode::button("Search"));
    page
}

#[tokio::test]
async fn auto_mode_clicks_and_completes() {
    let first = json!({
        "thought": "click the button",
        "message": "Clicking search",
        "action": "CLICK",
        "target_id": 1,
        "risk_score": "LOW",
        "new_title": "Click the search button"
    })
    .to_string();
    let script = vec![first, decision("DONE", None, None, "LOW")];

    let mut harness = Harness::build(
        button_page(),
        AutonomyMode::Auto,
        script,
        true,
        "https://example.com",
    );
    harness.runtime.run("click search").await.unwrap();

    assert!(harness.page.events().iter().any(|e| e == "click:1"));
    let messages = harness.messages();
    assert!(messages.iter().any(|m| m == "Task completed."));
    assert!(messages.iter().any(|m| m.contains("Thought: click the button")));
    assert_eq!(harness.runtime.conversation().title, "Click the search button");
    // Nothing blocked in auto mode.
    assert!(harness.approvals.lock().unwrap().is_empty());
}

#[tokio::test]
async fn batch_memory_save_appends_n_entries_with_one_confirmation() {
    let save = json!({
        "thought": "",
        "message": "saving",
        "action": "SAVE_MEMORY",
        "value": "{\"key\":\"prices\",\"value\":[\"$1\",\"$2\",\"$3\"]}",
        "risk_score": "LOW"
    })
    .to_string();
    let script = vec![save, decision("DONE", None, None, "LOW")];

    let mut harness = Harness::build(
        button_page(),
        AutonomyMode::Manual,
        script,
        false,
        "https://example.com",
    );
    harness.runtime.run("save the prices").await.unwrap();

    assert_eq!(harness.runtime.memory().entries("prices").unwrap().len(), 3);
    // Exactly one confirmation for the whole batch, never one per item.
    let confirmations = harness
        .messages()
        .iter()
        .filter(|m| m.starts_with("Batch saved 3 items to memory:"))
        .count();
    assert_eq!(confirmations, 1);

    // The model's own "saving" message was replaced by the confirmation.
    assert!(!harness.messages().iter().any(|m| m == "saving"));
    // Memory-only runs never announce completion: nothing was interacted with.
    assert!(!harness.messages().iter().any(|m| m == "Task completed."));
}

#[tokio::test]
async fn malformed_memory_payload_is_dropped_but_message_still_applies() {
    let save = json!({
        "thought": "",
        "message": "Noted the prices.",
        "action": "SAVE_MEMORY",
        "value": "this is not json",
        "risk_score": "LOW"
    })
    .to_string();
    let script = vec![save, decision("DONE", None, None, "LOW")];

    let mut harness = Harness::build(
        button_page(),
        AutonomyMode::Auto,
        script,
        true,
        "https://example.com",
    );
    harness.runtime.run("save the prices").await.unwrap();

    // The save was dropped, the loop went on, and the decision's message
    // still reached the conversation.
    assert!(harness.runtime.memory().is_empty());
    assert!(harness.messages().iter().any(|m| m == "Noted the prices."));
    assert_eq!(harness.decisions.prompts().len(), 2);
}

#[tokio::test]
async fn manual_mode_rejection_records_synthetic_message_and_skips_execution() {
    let script = vec![
        decision("CLICK", Some(1), None, "LOW"),
        decision("DONE", None, None, "LOW"),
    ];
    let mut harness = Harness::build(
        button_page(),
        AutonomyMode::Manual,
        script,
        false,
        "https://example.com",
    );
    harness.runtime.run("click it").await.unwrap();

    assert!(!harness.page.events().iter().any(|e| e.starts_with("click")));
    let rejected = harness
        .runtime
        .conversation()
        .messages
        .iter()
        .any(|m| m.role == Role::User && m.content == "I rejected that action");
    assert!(rejected);
    assert_eq!(harness.approvals.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn semi_mode_blocks_high_risk_until_approved() {
    let script = vec![
        decision("CLICK", Some(1), None, "HIGH"),
        decision("DONE", None, None, "LOW"),
    ];
    let mut harness = Harness::build(
        button_page(),
        AutonomyMode::Semi,
        script,
        true,
        "https://example.com",
    );
    harness.runtime.run("click it").await.unwrap();

    assert!(harness.page.events().iter().any(|e| e == "click:1"));
    let approvals = harness.approvals.lock().unwrap();
    assert_eq!(approvals.len(), 1);
    assert_eq!(approvals[0].1, RiskLevel::High);
    assert!(approvals[0].0.contains("Clicking"));
}

#[tokio::test]
async fn malformed_decision_is_surfaced_and_halts() {
    let script = vec!["the model rambled instead of emitting JSON".to_string()];
    let mut harness = Harness::build(
        button_page(),
        AutonomyMode::Auto,
        script,
        true,
        "https://example.com",
    );
    harness.runtime.run("do something").await.unwrap();

    assert!(harness
        .messages()
        .iter()
        .any(|m| m.starts_with("Error:") && m.contains("unparsable")));
    assert!(!harness.page.events().iter().any(|e| e.starts_with("click")));
}

#[tokio::test]
async fn restricted_surface_substitutes_synthetic_context() {
    let open = json!({
        "thought": "",
        "action": "OPEN_TAB",
        "value": "https://google.com",
        "risk_score": "LOW"
    })
    .to_string();
    let script = vec![open, decision("DONE", None, None, "LOW")];
    let mut harness = Harness::build(
        FixturePage::new("chrome://settings"),
        AutonomyMode::Auto,
        script,
        true,
        "chrome://settings",
    );
    harness.runtime.run("search for rust").await.unwrap();

    let prompts = harness.decisions.prompts();
    assert!(prompts[0].contains("browser system page"));
    assert_eq!(harness.shell.opened(), vec!["https://google.com"]);
    // The tab open counts as interaction, so completion is announced.
    assert!(harness.messages().iter().any(|m| m == "Task completed."));
}

#[tokio::test]
async fn stop_flag_halts_before_scanning() {
    let script = vec![decision("DONE", None, None, "LOW")];
    let mut harness = Harness::build(
        button_page(),
        AutonomyMode::Auto,
        script,
        true,
        "https://example.com",
    );
    harness.stop_tx.send(true).unwrap();
    harness.runtime.run("anything").await.unwrap();

    assert!(harness.messages().iter().any(|m| m == "Stopped by user."));
    assert!(harness.decisions.prompts().is_empty());
}

#[tokio::test]
async fn navigation_disconnect_is_treated_as_success() {
    let page = FixturePage::new("https://example.com");
    let mut link = FixtureNode::link("Next", "https://example.com/2");
    link.click_navigates = Some("https://example.com/2".to_string());
    page.push(link);

    let script = vec![
        decision("CLICK", Some(1), None, "LOW"),
        decision("DONE", None, None, "LOW"),
    ];
    let mut harness = Harness::build(
        page,
        AutonomyMode::Auto,
        script,
        true,
        "https://example.com",
    );
    harness.runtime.run("go to the next page").await.unwrap();

    let messages = harness.messages();
    assert!(!messages.iter().any(|m| m.starts_with("Action failed")));
    assert!(messages.iter().any(|m| m == "Task completed."));
    // The click happened exactly once; the retry path never fired.
    let clicks = harness
        .page
        .events()
        .iter()
        .filter(|e| e.starts_with("click:"))
        .count();
    assert_eq!(clicks, 1);
}

#[tokio::test]
async fn stale_element_failure_continues_to_next_scan() {
    let script = vec![
        decision("CLICK", Some(99), None, "LOW"),
        decision("DONE", None, None, "LOW"),
    ];
    let mut harness = Harness::build(
        button_page(),
        AutonomyMode::Auto,
        script,
        true,
        "https://example.com",
    );
    harness.runtime.run("click the ghost").await.unwrap();

    assert!(harness
        .messages()
        .iter()
        .any(|m| m == "Action failed: Element [ID: 99] not found."));
    // The loop went on to the next decision instead of halting.
    assert_eq!(harness.decisions.prompts().len(), 2);
}

#[tokio::test]
async fn tool_call_failure_is_surfaced_without_crashing_the_loop() {
    let call = json!({
        "thought": "",
        "action": "TOOL_CALL",
        "value": "{\"tool\":\"search\",\"source\":\"ghost\",\"args\":{}}",
        "risk_score": "LOW"
    })
    .to_string();
    let script = vec![call, decision("DONE", None, None, "LOW")];
    let mut harness = Harness::build(
        button_page(),
        AutonomyMode::Auto,
        script,
        true,
        "https://example.com",
    );
    harness.runtime.run("use the tool").await.unwrap();

    assert!(harness
        .messages()
        .iter()
        .any(|m| m.starts_with("Tool search failed:") && m.contains("ghost")));
    assert_eq!(harness.decisions.prompts().len(), 2);
}
