use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use omniagent_agent::{
    AgentRuntime, ApprovalRequest, LiveDecisionStep, RuntimeChannels, Shell,
};
use omniagent_core::config::SettingsStore;
use omniagent_core::{
    AutonomyMode, Error, PanelEvent, Paths, Result, RiskLevel, Role, Settings,
};
use omniagent_storage::ConversationStore;
use omniagent_surface::{FixtureInjector, FixturePage, PageDriver};
use omniagent_tools::McpManager;
use tokio::sync::{mpsc, watch};
use tracing::info;

/// Demo shell over the single fixture page: navigation moves that page,
/// opened tabs are only reported.
struct FixtureShell {
    page: FixturePage,
}

#[async_trait]
impl Shell for FixtureShell {
    async fn active_location(&self) -> Option<String> {
        Some(self.page.current_location())
    }

    async fn open_tab(&self, url: &str) -> Result<()> {
        info!(url, "demo shell: new tab requested, keeping the single surface");
        Ok(())
    }

    async fn navigate(&self, url: &str) -> Result<()> {
        let mut driver = self.page.clone();
        driver
            .navigate(url)
            .map_err(|e| Error::Surface(e.to_string()))
    }
}

pub async fn run(
    instruction: &str,
    page: Option<&Path>,
    autonomy: Option<&str>,
    conversation_id: &str,
) -> anyhow::Result<()> {
    let paths = Paths::new();
    paths.ensure_dirs()?;

    let mut settings = Settings::load_or_default(&paths)?;
    if let Some(mode) = autonomy {
        settings.autonomy = AutonomyMode::from_str(mode)
            .ok_or_else(|| anyhow::anyhow!("unknown autonomy mode: {}", mode))?;
    }

    let fixture = match page {
        Some(path) => FixturePage::from_file(path)?,
        None => FixturePage::demo(),
    };
    println!("Surface: {}", fixture.current_location());

    let settle = Duration::from_millis(settings.agent.settle_delay_ms);
    let surface_timeout = Duration::from_millis(settings.agent.surface_timeout_ms);
    let injector = Arc::new(FixtureInjector::new(fixture.clone(), settle, surface_timeout));
    let shell = Arc::new(FixtureShell { page: fixture });

    let tools = Arc::new(McpManager::new(Duration::from_secs(
        settings.agent.rpc_timeout_secs,
    )));
    tools.sync_servers(&settings.tool_servers).await;

    let conversation_id = if conversation_id == "new" {
        uuid::Uuid::new_v4().to_string()
    } else {
        conversation_id.to_string()
    };
    let store = ConversationStore::new(paths);
    let conversation = store.load(&conversation_id)?;

    let (panel_tx, panel_rx) = mpsc::channel(64);
    let (approval_tx, approval_rx) = mpsc::channel(8);
    let (stop_tx, stop_rx) = watch::channel(false);

    let printer = tokio::spawn(panel_printer(panel_rx));
    tokio::spawn(approval_prompt(approval_rx));
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = stop_tx.send(true);
        }
    });

    let mut runtime = AgentRuntime::new(
        Arc::new(SettingsStore::new(settings)),
        Arc::new(LiveDecisionStep),
        injector,
        shell,
        tools,
        store,
        conversation,
        RuntimeChannels {
            panel_tx,
            approval_tx,
            stop_rx,
        },
    );

    runtime.run(instruction).await?;
    printer.await.ok();
    Ok(())
}

async fn panel_printer(mut rx: mpsc::Receiver<PanelEvent>) {
    while let Some(event) = rx.recv().await {
        match event {
            PanelEvent::Message { role, content } => {
                let tag = match role {
                    Role::User => "you",
                    Role::Agent => "agent",
                    Role::System => "system",
                };
                println!("[{}] {}", tag, content);
            }
            PanelEvent::Status { text } => println!("  · {}", text),
            PanelEvent::RunFinished => break,
        }
    }
}

async fn approval_prompt(mut rx: mpsc::Receiver<ApprovalRequest>) {
    while let Some(request) = rx.recv().await {
        let prefix = if request.risk == RiskLevel::High {
            "[HIGH RISK] "
        } else {
            ""
        };
        println!("{}Proposed action: {}", prefix, request.summary);
        println!("Approve? [y/N]");

        let answer = tokio::task::spawn_blocking(|| {
            let mut line = String::new();
            std::io::stdin().read_line(&mut line).ok();
            line
        })
        .await
        .unwrap_or_default();

        request.ticket.resolve(answer.trim().eq_ignore_ascii_case("y"));
    }
}
