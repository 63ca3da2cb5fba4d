use crate::{Error, Result};
use serde_json::Value;
use super::protocol::JsonRpcMessage;
use super::transport_trait::McpTransportTrait;
use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::{debug, trace};

pub struct StdioTransport {
    stdin: BufReader<tokio::io::Stdin>,
    stdout: tokio::io::Stdout,
}

impl StdioTransport {
    pub fn new() -> Self {
        Self {
            stdin: BufReader::new(tokio::io::stdin()),
            stdout: tokio::io::stdout(),
        }
    }

    pub async fn read_message(&mut self) -> Result<JsonRpcMessage> {
        // MCP uses line-based JSON-RPC transport (not LSP's Content-Length headers)
        // Each message is a single line terminated by \n
        // See: https://spec.modelcontextprotocol.io/specification/basic/transports/#stdio

        let mut line = String::new();
        let bytes_read = self.stdin.read_line(&mut line).await?;

        if bytes_read == 0 {
            return Err(Error::InvalidRequest("EOF reached".to_string()));
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            return Err(Error::InvalidRequest("Empty message line".to_string()));
        }

        trace!("Reading MCP message: {} bytes", trimmed.len());
        debug!("Received message: {}", trimmed);

        let msg: JsonRpcMessage = serde_json::from_str(trimmed)?;
        Ok(msg)
    }

    pub async fn write_message(&mut self, msg: &JsonRpcMessage) -> Result<()> {
        // MCP uses line-based JSON-RPC transport (not LSP's Content-Length headers)
        // Each message is a single line terminated by \n
        // See: https://spec.modelcontextprotocol.io/specification/basic/transports/#stdio

        let content = serde_json::to_string(msg)?;
        debug!("Sending message: {}", content);

        self.stdout.write_all(content.as_bytes()).await?;
        self.stdout.write_all(b"\n").await?;
        self.stdout.flush().await?;

        Ok(())
    }
}

// Implement the trait for the concrete transport
#[async_trait]
impl McpTransportTrait for StdioTransport {
    async fn read_message(&mut self) -> Result<JsonRpcMessage> {
        // Delegate to existing implementation
        self.read_message().await
    }

    async fn write_message(&mut self, msg: &JsonRpcMessage) -> Result<()> {
        // Delegate to existing implementation
        self.write_message(msg).await
    }
}
