use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use omniagent_core::config::ToolServerConfig;
use omniagent_core::{Error, Result};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::client::{ConnectionStatus, McpClient};

/// A tool advertised by a connected server, tagged with its source. Tools are
/// not deduplicated or renamed across servers; callers disambiguate by source.
#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub name: String,
    pub description: Option<String>,
    pub input_schema: Value,
    pub server: String,
}

/// Holds the connections to all configured tool servers.
///
/// Reconciliation is declarative: `sync_servers` connects what is new, tears
/// down what disappeared and leaves the rest untouched. There is no automatic
/// reconnect; a failed connection stays in the error state until the caller
/// re-supplies the server list.
pub struct McpManager {
    clients: Mutex<HashMap<String, Arc<McpClient>>>,
    rpc_timeout: Duration,
}

impl McpManager {
    pub fn new(rpc_timeout: Duration) -> Self {
        Self {
            clients: Mutex::new(HashMap::new()),
            rpc_timeout,
        }
    }

    pub async fn sync_servers(&self, servers: &[ToolServerConfig]) {
        let mut clients = self.clients.lock().await;

        let desired: HashSet<&str> = servers.iter().map(|s| s.name.as_str()).collect();
        let stale: Vec<String> = clients
            .keys()
            .filter(|name| !desired.contains(name.as_str()))
            .cloned()
            .collect();
        for name in stale {
            if let Some(client) = clients.remove(&name) {
                info!(server = %name, "removing tool server");
                client.disconnect().await;
            }
        }

        for config in servers {
            if clients.contains_key(&config.name) {
                continue;
            }
            let client = Arc::new(McpClient::new(&config.name, &config.url, self.rpc_timeout));
            clients.insert(config.name.clone(), client.clone());
            // Connect in the background so one slow server cannot stall
            // reconciliation of the others.
            tokio::spawn(async move {
                if let Err(e) = client.connect().await {
                    warn!(server = %client.name(), error = %e, "tool server connection failed");
                }
            });
        }
    }

    /// Aggregated catalog across all connected servers.
    pub async fn all_tools(&self) -> Vec<ToolDescriptor> {
        let clients = self.clients.lock().await;
        let mut all = Vec::new();
        for (name, client) in clients.iter() {
            if client.status() != ConnectionStatus::Connected {
                continue;
            }
            for tool in client.tools().await {
                all.push(ToolDescriptor {
                    name: tool.name,
                    description: tool.description,
                    input_schema: tool.input_schema,
                    server: name.clone(),
                });
            }
        }
        all
    }

    /// Invoke a tool on a named server. An unknown source fails immediately,
    /// without any network attempt.
    pub async fn call_tool(&self, source: &str, tool: &str, args: Value) -> Result<Value> {
        let client = self
            .clients
            .lock()
            .await
            .get(source)
            .cloned()
            .ok_or_else(|| Error::NotFound(format!("MCP server '{}' not found", source)))?;
        client.call_tool(tool, args).await
    }

    pub async fn server_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.clients.lock().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn statuses(&self) -> Vec<(String, ConnectionStatus)> {
        let clients = self.clients.lock().await;
        let mut out: Vec<(String, ConnectionStatus)> = clients
            .iter()
            .map(|(name, client)| (name.clone(), client.status()))
            .collect();
        out.sort_by(|a, b| a.0.cmp(&b.0));
        out
    }

    pub async fn client(&self, name: &str) -> Option<Arc<McpClient>> {
        self.clients.lock().await.get(name).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn server(name: &str) -> ToolServerConfig {
        // A closed local port: connection attempts fail fast, which is all
        // these tests need — reconciliation never depends on connect success.
        ToolServerConfig {
            name: name.to_string(),
            url: format!("http://127.0.0.1:9/{}", name),
        }
    }

    #[tokio::test]
    async fn sync_connects_new_and_tears_down_removed() {
        let manager = McpManager::new(Duration::from_secs(1));
        manager.sync_servers(&[server("a"), server("b")]).await;
        assert_eq!(manager.server_names().await, vec!["a", "b"]);

        let b_before = manager.client("b").await.unwrap();

        manager.sync_servers(&[server("b"), server("c")]).await;
        assert_eq!(manager.server_names().await, vec!["b", "c"]);

        // b kept its connection object: untouched, not reconnected.
        let b_after = manager.client("b").await.unwrap();
        assert!(Arc::ptr_eq(&b_before, &b_after));
        assert!(manager.client("a").await.is_none());
    }

    #[tokio::test]
    async fn call_tool_on_unknown_source_fails_immediately() {
        let manager = McpManager::new(Duration::from_secs(1));
        let err = manager
            .call_tool("ghost", "search", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
        assert!(err.to_string().contains("ghost"));
    }

    #[tokio::test]
    async fn tools_from_unconnected_servers_are_not_listed() {
        let manager = McpManager::new(Duration::from_secs(1));
        manager.sync_servers(&[server("a")]).await;
        assert!(manager.all_tools().await.is_empty());
    }
}
