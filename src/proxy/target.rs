//! Target Server Connection (spec §4.8).
//!
//! Owns one child tool-serving process (or a dialed remote endpoint),
//! speaks the same length-delimited JSON-RPC framing described in §6 over
//! its stdio, and forwards `tools/call` invocations after stripping the
//! `serverName__` namespace prefix. On unexpected disconnect it arms the
//! shared [`ReconnectionManager`] rather than hand-rolling its own backoff
//! loop — the CDP WebSocket Transport uses the same primitive for the same
//! reason (spec §2: both subsystems share their reconnection machinery).

use std::process::Stdio;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, Command};
use tokio::sync::{broadcast, mpsc, RwLock};
use tracing::warn;

use crate::config::{ReconnectPolicy, ServerSpec};
use crate::reconnect::{BackoffParams, ReconnectionManager};
use crate::rpc::correlator::Correlator;
use crate::rpc::message::{JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcResponse};
use crate::{Error, Result};

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Clone)]
pub struct ToolDescriptor {
    pub original_name: String,
    pub description: Option<String>,
    pub input_schema: Value,
}

#[derive(Debug, Clone)]
pub enum ConnectionState {
    Disconnected { reason: String },
    Connecting,
    Connected { since: Instant },
    Error { message: String, at: Instant },
}

impl ConnectionState {
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }
}

#[derive(Debug, Clone)]
pub enum TargetEvent {
    Connected,
    Disconnected { reason: String },
    Reconnecting { attempt: u32, next_delay_ms: u64 },
}

struct Writer {
    tx: mpsc::UnboundedSender<Value>,
}

/// One child connection. Cloning shares the same underlying state (all
/// fields are `Arc`/lock-guarded); the Proxy Core keeps one instance per
/// `ServerSpec` and never constructs a second for the same name.
#[derive(Clone)]
pub struct TargetServerConnection {
    pub name: String,
    spec: ServerSpec,
    policy: ReconnectPolicy,
    correlator: Arc<Correlator>,
    writer: Arc<RwLock<Option<Writer>>>,
    child: Arc<RwLock<Option<Child>>>,
    state: Arc<RwLock<ConnectionState>>,
    events: broadcast::Sender<TargetEvent>,
    reconnect: Arc<ReconnectionManager>,
}

impl TargetServerConnection {
    pub fn new(spec: ServerSpec, policy: ReconnectPolicy) -> Self {
        let (events, _rx) = broadcast::channel(64);
        let backoff = BackoffParams {
            max_attempts: policy.max_attempts,
            initial_delay_ms: policy.initial_delay_ms,
            backoff_multiplier: policy.backoff_multiplier,
            max_delay_ms: policy.max_delay_ms,
        };
        Self {
            name: spec.name.clone(),
            reconnect: Arc::new(ReconnectionManager::new(backoff, spec.name.clone())),
            spec,
            policy,
            correlator: Arc::new(Correlator::new(REQUEST_TIMEOUT)),
            writer: Arc::new(RwLock::new(None)),
            child: Arc::new(RwLock::new(None)),
            state: Arc::new(RwLock::new(ConnectionState::Disconnected {
                reason: "not yet connected".to_string(),
            })),
            events,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TargetEvent> {
        self.events.subscribe()
    }

    pub async fn state(&self) -> ConnectionState {
        self.state.read().await.clone()
    }

    /// Spawns or dials, performs the MCP handshake, and returns the tools
    /// the child advertised via `tools/list`.
    pub async fn connect(&self) -> Result<Vec<ToolDescriptor>> {
        *self.state.write().await = ConnectionState::Connecting;
        match self.establish_transport().await {
            Ok(()) => {}
            Err(e) => {
                *self.state.write().await = ConnectionState::Error {
                    message: e.to_string(),
                    at: Instant::now(),
                };
                return Err(e);
            }
        }

        match self.handshake().await {
            Ok(tools) => {
                *self.state.write().await = ConnectionState::Connected { since: Instant::now() };
                let _ = self.events.send(TargetEvent::Connected);
                Ok(tools)
            }
            Err(e) => {
                *self.state.write().await = ConnectionState::Error {
                    message: e.to_string(),
                    at: Instant::now(),
                };
                Err(e)
            }
        }
    }

    async fn establish_transport(&self) -> Result<()> {
        if let Some(url) = &self.spec.url {
            return Err(Error::Config(format!(
                "remote target servers are not yet wired to a transport: {url}"
            )));
        }

        let mut cmd = Command::new(&self.spec.command);
        cmd.args(&self.spec.args);
        for (k, v) in &self.spec.env {
            cmd.env(k, v);
        }
        cmd.stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| Error::Process(format!("failed to spawn {}: {e}", self.spec.command)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| Error::Process("child stdin not piped".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| Error::Process("child stdout not piped".to_string()))?;

        let tx = self.spawn_io_tasks(stdin, stdout);
        *self.writer.write().await = Some(Writer { tx });
        *self.child.write().await = Some(child);
        Ok(())
    }

    /// Spawns the stdin writer and stdout reader loops and returns the
    /// writer's sending half. The caller installs it into `self.writer`
    /// itself, synchronously, before `establish_transport` returns — the
    /// writer must be in place before `handshake` can issue its first
    /// request, and a detached task racing that first request has no
    /// happens-before guarantee of running first.
    fn spawn_io_tasks(&self, mut stdin: ChildStdin, stdout: tokio::process::ChildStdout) -> mpsc::UnboundedSender<Value> {
        let (tx, mut rx) = mpsc::unbounded_channel::<Value>();
        tokio::spawn(async move {
            while let Some(frame) = rx.recv().await {
                let mut line = frame.to_string();
                line.push('\n');
                if stdin.write_all(line.as_bytes()).await.is_err() {
                    break;
                }
            }
        });

        let this = self.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if line.trim().is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<Value>(&line) {
                            Ok(value) => {
                                if let Some(msg) = decode_frame(value) {
                                    this.correlator.deliver(msg).await;
                                }
                            }
                            Err(e) => warn!(server = %this.name, "malformed frame, dropping: {e}"),
                        }
                    }
                    Ok(None) | Err(_) => break,
                }
            }
            this.on_disconnect("child process stdio closed").await;
        });

        tx
    }

    async fn on_disconnect(&self, reason: &str) {
        *self.writer.write().await = None;
        self.correlator.close(reason).await;
        *self.state.write().await = ConnectionState::Disconnected {
            reason: reason.to_string(),
        };
        let _ = self.events.send(TargetEvent::Disconnected {
            reason: reason.to_string(),
        });
        if self.policy.enabled {
            self.arm_reconnect().await;
        }
    }

    async fn arm_reconnect(&self) {
        let this = self.clone();
        let events = self.events.clone();
        self.reconnect
            .schedule(
                move || {
                    let this = this.clone();
                    async move { this.connect().await.map(|_| ()).map_err(|e| e.to_string()) }
                },
                move |attempt, delay| {
                    let _ = events.send(TargetEvent::Reconnecting {
                        attempt,
                        next_delay_ms: delay.as_millis() as u64,
                    });
                },
                {
                    let name = self.name.clone();
                    move || warn!(server = %name, "reconnection attempts exhausted, giving up")
                },
            )
            .await;
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.reconnect.cancel().await;
        *self.writer.write().await = None;
        self.correlator.close("manual disconnect").await;
        if let Some(mut child) = self.child.write().await.take() {
            let _ = child.start_kill();
        }
        *self.state.write().await = ConnectionState::Disconnected {
            reason: "manual disconnect".to_string(),
        };
        Ok(())
    }

    pub async fn reconnect_now(&self) -> Result<Vec<ToolDescriptor>> {
        if matches!(self.state.read().await.clone(), ConnectionState::Connecting) {
            return Err(Error::ReconnectInProgress(self.name.clone()));
        }
        self.reconnect.cancel().await;
        self.connect().await
    }

    async fn handshake(&self) -> Result<Vec<ToolDescriptor>> {
        let init_result = self
            .send_request(
                "initialize",
                Some(serde_json::json!({
                    "protocolVersion": "2024-11-05",
                    "capabilities": {},
                    "clientInfo": {"name": "funnel-mcp", "version": env!("CARGO_PKG_VERSION")},
                })),
                HANDSHAKE_TIMEOUT,
            )
            .await?;
        let _ = init_result;

        self.send_notification("notifications/initialized", None).await?;

        let list_result = self
            .send_request("tools/list", None, HANDSHAKE_TIMEOUT)
            .await?;
        let tools = list_result
            .get("tools")
            .and_then(|t| t.as_array())
            .cloned()
            .unwrap_or_default();

        Ok(tools
            .into_iter()
            .filter_map(|t| {
                let name = t.get("name")?.as_str()?.to_string();
                Some(ToolDescriptor {
                    original_name: name,
                    description: t.get("description").and_then(|d| d.as_str()).map(str::to_string),
                    input_schema: t.get("inputSchema").cloned().unwrap_or(Value::Null),
                })
            })
            .collect())
    }

    /// Forwards `tools/call` for the unprefixed tool name; callers strip
    /// the `serverName__` prefix before invoking this.
    pub async fn call_tool(&self, original_name: &str, arguments: Value) -> Result<Value> {
        if !self.state.read().await.is_connected() {
            return Err(Error::InvalidState(format!(
                "target server {} is not connected",
                self.name
            )));
        }
        self.send_request(
            "tools/call",
            Some(serde_json::json!({"name": original_name, "arguments": arguments})),
            REQUEST_TIMEOUT,
        )
        .await
    }

    async fn send_request(&self, method: &str, params: Option<Value>, timeout: Duration) -> Result<Value> {
        let (corr_id, rx) = self.correlator.begin().await;
        let frame = serde_json::json!({
            "jsonrpc": "2.0",
            "id": corr_id,
            "method": method,
            "params": params.unwrap_or(Value::Object(Default::default())),
        });
        self.write(frame).await?;
        self.correlator.await_response(corr_id, rx, Some(timeout)).await
    }

    async fn send_notification(&self, method: &str, params: Option<Value>) -> Result<()> {
        let frame = serde_json::json!({
            "jsonrpc": "2.0",
            "method": method,
            "params": params.unwrap_or(Value::Object(Default::default())),
        });
        self.write(frame).await
    }

    async fn write(&self, frame: Value) -> Result<()> {
        let writer = self.writer.read().await;
        let writer = writer
            .as_ref()
            .ok_or_else(|| Error::InvalidState(format!("target server {} has no active writer", self.name)))?;
        writer
            .tx
            .send(frame)
            .map_err(|_| Error::Transport(format!("target server {} write channel closed", self.name)))
    }
}

fn decode_frame(value: Value) -> Option<JsonRpcMessage> {
    if value.get("id").is_some() {
        let id = value.get("id").cloned().unwrap_or(Value::Null);
        if let Some(error) = value.get("error") {
            let err: JsonRpcError = serde_json::from_value(error.clone()).ok()?;
            return Some(JsonRpcMessage::Response(JsonRpcResponse {
                jsonrpc: "2.0".to_string(),
                id,
                result: None,
                error: Some(err),
            }));
        }
        return Some(JsonRpcMessage::Response(JsonRpcResponse {
            jsonrpc: "2.0".to_string(),
            id,
            result: Some(value.get("result").cloned().unwrap_or(Value::Null)),
            error: None,
        }));
    }
    let method = value.get("method")?.as_str()?.to_string();
    Some(JsonRpcMessage::Notification(JsonRpcNotification {
        jsonrpc: "2.0".to_string(),
        method,
        params: value.get("params").cloned(),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> ServerSpec {
        ServerSpec {
            name: "echo".to_string(),
            command: "true".to_string(),
            args: vec![],
            env: Default::default(),
            url: None,
        }
    }

    #[tokio::test]
    async fn fresh_connection_starts_disconnected() {
        let conn = TargetServerConnection::new(spec(), ReconnectPolicy::default());
        assert!(!conn.state().await.is_connected());
    }

    #[tokio::test]
    async fn call_tool_rejects_when_not_connected() {
        let conn = TargetServerConnection::new(spec(), ReconnectPolicy::default());
        let result = conn.call_tool("whatever", Value::Null).await;
        assert!(matches!(result, Err(Error::InvalidState(_))));
    }

    #[test]
    fn decode_frame_distinguishes_response_from_notification() {
        let resp = decode_frame(serde_json::json!({"id": 1, "result": {}})).unwrap();
        assert!(matches!(resp, JsonRpcMessage::Response(_)));
        let notif = decode_frame(serde_json::json!({"method": "log", "params": {}})).unwrap();
        assert!(matches!(notif, JsonRpcMessage::Notification(_)));
    }
}
