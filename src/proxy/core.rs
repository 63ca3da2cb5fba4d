//! Proxy Core (spec §4.10): owns one [`TargetServerConnection`] per
//! configured server, connects them concurrently at startup, registers
//! discovered tools into the [`ToolRegistry`], and exposes the merged
//! operations the Request Dispatcher calls into.

use std::collections::HashMap;
use std::sync::Arc;

use futures_util::future::join_all;
use tokio::sync::{broadcast, RwLock};
use tracing::{info, warn};

use crate::config::Config;
use crate::proxy::registry::{RegistryStats, ToolRecord, ToolRegistry, VisibilityRules};
use crate::proxy::target::{ConnectionState, TargetEvent, TargetServerConnection};
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub enum ProxyEvent {
    ServerConnected { server: String },
    ServerDisconnected { server: String, reason: String },
    ServerReconnecting { server: String, attempt: u32, next_delay_ms: u64 },
}

pub struct ProxyCore {
    connections: HashMap<String, TargetServerConnection>,
    registry: Arc<RwLock<ToolRegistry>>,
    events: broadcast::Sender<ProxyEvent>,
}

impl ProxyCore {
    pub fn new(config: &Config) -> Self {
        let rules = VisibilityRules {
            expose_tools: config.expose_tools.clone(),
            hide_tools: config.hide_tools.clone(),
            always_visible_tools: config.always_visible_tools.clone(),
            expose_core_tools: config.expose_core_tools,
        };
        let connections = config
            .servers()
            .iter()
            .map(|spec| {
                (
                    spec.name.clone(),
                    TargetServerConnection::new(spec.clone(), config.auto_reconnect.clone()),
                )
            })
            .collect();
        let (events, _rx) = broadcast::channel(256);
        Self {
            connections,
            registry: Arc::new(RwLock::new(ToolRegistry::new(rules))),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ProxyEvent> {
        self.events.subscribe()
    }

    /// Marks this system's own tool-dispatching operations (e.g. the
    /// debugger tool surface, when bound) as always-exposed core tools.
    pub async fn set_core_tools(&self, names: Vec<String>) {
        self.registry.write().await.set_core_tools(names);
    }

    /// Connects every configured target server concurrently. A single
    /// server failing to connect does not prevent the others from coming
    /// up; failures are logged and left for the reconnection machinery.
    pub async fn connect_all(&self) {
        let tasks = self.connections.values().map(|conn| {
            let conn = conn.clone();
            let registry = self.registry.clone();
            let events = self.events.clone();
            async move {
                Self::watch_events(conn.subscribe(), conn.name.clone(), events.clone());
                match conn.connect().await {
                    Ok(tools) => {
                        info!(server = %conn.name, tools = tools.len(), "target server connected");
                        registry.write().await.register(&conn.name, tools);
                    }
                    Err(e) => {
                        warn!(server = %conn.name, "initial connect failed: {e}");
                    }
                }
            }
        });
        join_all(tasks).await;
    }

    fn watch_events(mut rx: broadcast::Receiver<TargetEvent>, server: String, events: broadcast::Sender<ProxyEvent>) {
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(TargetEvent::Connected) => {
                        let _ = events.send(ProxyEvent::ServerConnected { server: server.clone() });
                    }
                    Ok(TargetEvent::Disconnected { reason }) => {
                        let _ = events.send(ProxyEvent::ServerDisconnected {
                            server: server.clone(),
                            reason,
                        });
                    }
                    Ok(TargetEvent::Reconnecting { attempt, next_delay_ms }) => {
                        let _ = events.send(ProxyEvent::ServerReconnecting {
                            server: server.clone(),
                            attempt,
                            next_delay_ms,
                        });
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
    }

    /// Tools currently visible to the upstream client, across every server.
    pub async fn list_tools(&self) -> Vec<ToolRecord> {
        self.registry.read().await.visible_tools().into_iter().cloned().collect()
    }

    /// Forwards a call by `fullName` (`serverName__originalName`) to its
    /// owning target server, stripping the namespace prefix.
    pub async fn call_tool(&self, full_name: &str, arguments: serde_json::Value) -> Result<serde_json::Value> {
        let record = self
            .registry
            .read()
            .await
            .get(full_name)
            .cloned()
            .ok_or_else(|| Error::ToolNotFound(full_name.to_string()))?;
        let conn = self
            .connections
            .get(&record.server)
            .ok_or_else(|| Error::ServerNotFound(record.server.clone()))?;
        conn.call_tool(&record.original_name, arguments).await
    }

    pub async fn reconnect_server(&self, name: &str) -> Result<()> {
        let conn = self
            .connections
            .get(name)
            .ok_or_else(|| Error::ServerNotFound(name.to_string()))?;
        let tools = conn.reconnect_now().await?;
        self.registry.write().await.register(name, tools);
        Ok(())
    }

    pub async fn disconnect_server(&self, name: &str) -> Result<()> {
        let conn = self
            .connections
            .get(name)
            .ok_or_else(|| Error::ServerNotFound(name.to_string()))?;
        conn.disconnect().await?;
        self.registry.write().await.unregister_server(name);
        Ok(())
    }

    pub async fn get_server_status(&self, name: &str) -> Result<ConnectionState> {
        let conn = self
            .connections
            .get(name)
            .ok_or_else(|| Error::ServerNotFound(name.to_string()))?;
        Ok(conn.state().await)
    }

    pub fn get_target_servers(&self) -> Vec<String> {
        self.connections.keys().cloned().collect()
    }

    pub async fn registry_stats(&self) -> RegistryStats {
        self.registry.read().await.stats()
    }

    /// Disconnects every target server, used by graceful shutdown so child
    /// processes are released deterministically rather than only on drop.
    pub async fn disconnect_all(&self) {
        for conn in self.connections.values() {
            if let Err(e) = conn.disconnect().await {
                warn!(server = %conn.name, "error during shutdown disconnect: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_config_yields_no_servers_and_no_tools() {
        let core = ProxyCore::new(&Config::default());
        assert!(core.get_target_servers().is_empty());
        assert!(core.list_tools().await.is_empty());
    }

    #[tokio::test]
    async fn call_tool_on_unknown_name_is_tool_not_found() {
        let core = ProxyCore::new(&Config::default());
        let result = core.call_tool("ghost__do_thing", serde_json::Value::Null).await;
        assert!(matches!(result, Err(Error::ToolNotFound(_))));
    }

    #[tokio::test]
    async fn status_of_unknown_server_is_server_not_found() {
        let core = ProxyCore::new(&Config::default());
        let result = core.get_server_status("ghost").await;
        assert!(matches!(result, Err(Error::ServerNotFound(_))));
    }

    #[tokio::test]
    async fn disconnect_all_on_empty_config_is_noop() {
        let core = ProxyCore::new(&Config::default());
        core.disconnect_all().await;
    }
}
