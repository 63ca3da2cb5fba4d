pub mod dispatcher;
pub mod protocol;
pub mod transport;
pub mod transport_trait;

use std::sync::Arc;
use std::time::Duration;

use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};

use crate::config::Config;
use crate::debug::SessionManager;
use crate::proxy::ProxyCore;
use crate::Result;
use dispatcher::Dispatcher;
use transport::StdioTransport;

pub struct McpServer {
    transport: StdioTransport,
    dispatcher: Dispatcher,
}

impl McpServer {
    pub async fn new(config: Config, enable_debugger: bool) -> Result<Self> {
        info!(debugger = enable_debugger, "initializing funnel-mcp server");

        let proxy = ProxyCore::new(&config);
        proxy.set_core_tools(Dispatcher::core_tool_names(enable_debugger)).await;
        proxy.connect_all().await;

        let sessions = Arc::new(SessionManager::new(Duration::from_secs(30 * 60)));
        sessions.start_idle_cleanup().await;

        Ok(Self {
            transport: StdioTransport::new(),
            dispatcher: Dispatcher::new(proxy, sessions, enable_debugger),
        })
    }

    /// Serves `tools/list`/`tools/call` over stdio until the upstream
    /// channel closes or a shutdown signal arrives, then releases every
    /// target server and debug session before returning.
    pub async fn run(mut self) -> Result<()> {
        info!("funnel-mcp server listening on stdio");

        let mut sigterm = signal(SignalKind::terminate())?;
        let mut outcome = Ok(());

        loop {
            tokio::select! {
                msg = self.transport.read_message() => {
                    match msg {
                        Ok(msg) => {
                            if let Some(response) = self.dispatcher.handle_message(msg).await {
                                if let Err(e) = self.transport.write_message(&response).await {
                                    error!("failed to write response: {e}");
                                    outcome = Err(e);
                                    break;
                                }
                            }
                        }
                        Err(e) => {
                            error!("failed to read message: {e}");
                            outcome = Err(e);
                            break;
                        }
                    }
                }
                _ = tokio::signal::ctrl_c() => {
                    info!("received SIGINT, shutting down");
                    break;
                }
                _ = sigterm.recv() => {
                    info!("received SIGTERM, shutting down");
                    break;
                }
            }
        }

        self.dispatcher.shutdown().await;
        outcome
    }
}
