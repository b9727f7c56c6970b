use std::time::Duration;

use omniagent_core::{Paths, Settings};
use omniagent_tools::McpManager;

pub async fn run() -> anyhow::Result<()> {
    let paths = Paths::new();
    let settings = Settings::load_or_default(&paths)?;

    let key_present = settings.provider.name == "ollama"
        || settings.provider.api_key(&settings.provider.name).is_some();

    println!("Config:    {}", paths.config_file().display());
    println!("Provider:  {}", settings.provider.name);
    println!("API key:   {}", if key_present { "set" } else { "missing" });
    println!("Autonomy:  {}", settings.autonomy.as_str());

    if settings.tool_servers.is_empty() {
        println!("Tool servers: none configured");
        return Ok(());
    }

    let manager = McpManager::new(Duration::from_secs(settings.agent.rpc_timeout_secs));
    manager.sync_servers(&settings.tool_servers).await;
    // Give background connections a moment before reporting.
    tokio::time::sleep(Duration::from_secs(2)).await;

    println!("Tool servers:");
    for (name, status) in manager.statuses().await {
        println!("  {:<20} {}", name, status.as_str());
    }
    Ok(())
}
