pub mod cdp;
pub mod config;
pub mod debug;
pub mod error;
pub mod mcp;
pub mod proxy;
pub mod reconnect;
pub mod rpc;
pub mod sourcemap;
pub mod ws;

pub use error::Error;
pub use mcp::McpServer;

pub type Result<T> = std::result::Result<T, Error>;

pub async fn serve(config: config::Config, enable_debugger: bool) -> Result<()> {
    let server = McpServer::new(config, enable_debugger).await?;
    server.run().await
}
