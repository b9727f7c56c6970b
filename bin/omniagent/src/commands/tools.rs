use std::time::Duration;

use omniagent_core::{Paths, Settings};
use omniagent_tools::McpManager;

pub async fn run() -> anyhow::Result<()> {
    let paths = Paths::new();
    let settings = Settings::load_or_default(&paths)?;

    if settings.tool_servers.is_empty() {
        println!("No tool servers configured.");
        return Ok(());
    }

    let manager = McpManager::new(Duration::from_secs(settings.agent.rpc_timeout_secs));
    manager.sync_servers(&settings.tool_servers).await;
    tokio::time::sleep(Duration::from_secs(2)).await;

    let tools = manager.all_tools().await;
    if tools.is_empty() {
        println!("No tools advertised (are the servers reachable?).");
        return Ok(());
    }

    for tool in tools {
        println!(
            "[{}] {} — {}",
            tool.server,
            tool.name,
            tool.description.as_deref().unwrap_or("(no description)")
        );
    }
    Ok(())
}
