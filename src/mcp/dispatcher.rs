//! Request Dispatcher (spec §4.11).
//!
//! Binds the upstream stdio channel, translates `tools/list` and
//! `tools/call` to the Proxy Core, and — when a debug session id is
//! present in a tool's arguments — routes the debugger operations to the
//! Session Manager. No error ever escapes to the upstream channel: every
//! branch below resolves to a `JsonRpcResponse`, using [`Error::error_code`]
//! for the failure cases.

use serde_json::{json, Value};
use tracing::{debug, warn};

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::cdp::types::Location;
use crate::debug::manager::SessionManager;
use crate::debug::session::{DebugSessionConfig, SessionTarget};
use crate::debug::state::BreakpointSpec;
use crate::mcp::protocol::{JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcRequest, JsonRpcResponse};
use crate::proxy::ProxyCore;
use crate::Error;

/// Read-only fleet management tools (spec §4.10) this system answers
/// itself: `getTargetServers`, `getServerStatus`, `reconnectServer`,
/// `disconnectServer`. Always registered as core tools regardless of the
/// `--debugger` flag.
pub const PROXY_CORE_TOOLS: &[&str] = &[
    "funnel__list_servers",
    "funnel__server_status",
    "funnel__reconnect_server",
    "funnel__disconnect_server",
];

/// Debugger operation names this system answers itself rather than
/// forwarding to a target server. Registered only when the debugger
/// feature is enabled (spec §6: "the optional debugger methods defined by
/// this system"). Registered with the Tool Registry as always-visible core
/// tools (spec §4.9) so visibility rules never accidentally hide them.
pub const DEBUGGER_CORE_TOOLS: &[&str] = &[
    "debugger__start_session",
    "debugger__continue",
    "debugger__step_over",
    "debugger__step_into",
    "debugger__step_out",
    "debugger__pause",
    "debugger__continue_to_location",
    "debugger__get_stacktrace",
    "debugger__get_scopes",
    "debugger__get_variables",
    "debugger__evaluate",
    "debugger__set_breakpoint",
    "debugger__remove_breakpoint",
    "debugger__list_sessions",
    "debugger__stop_session",
    "debugger__search_console_output",
    "debugger__cleanup_sessions",
];

pub struct Dispatcher {
    proxy: ProxyCore,
    sessions: Arc<SessionManager>,
    initialized: bool,
    debugger_enabled: bool,
}

impl Dispatcher {
    pub fn new(proxy: ProxyCore, sessions: Arc<SessionManager>, debugger_enabled: bool) -> Self {
        Self {
            proxy,
            sessions,
            initialized: false,
            debugger_enabled,
        }
    }

    /// The full set of tool names this dispatcher answers itself, given
    /// whether the debugger feature is bound. Used both to seed the Tool
    /// Registry's always-visible core tools and to build the `tools/list`
    /// descriptors below.
    pub fn core_tool_names(debugger_enabled: bool) -> Vec<String> {
        let mut names: Vec<String> = PROXY_CORE_TOOLS.iter().map(|s| s.to_string()).collect();
        if debugger_enabled {
            names.extend(DEBUGGER_CORE_TOOLS.iter().map(|s| s.to_string()));
        }
        names
    }

    /// Releases every target server's child process and every debug
    /// session's spawned/attached target on shutdown, rather than relying
    /// on drop order during process exit.
    pub async fn shutdown(&self) {
        for id in self.sessions.list_sessions().await {
            if let Err(e) = self.sessions.stop_session(&id).await {
                warn!(session = %id, "error stopping session during shutdown: {e}");
            }
        }
        self.proxy.disconnect_all().await;
    }

    pub async fn handle_message(&mut self, msg: JsonRpcMessage) -> Option<JsonRpcMessage> {
        match msg {
            JsonRpcMessage::Request(req) => Some(JsonRpcMessage::Response(self.handle_request(req).await)),
            JsonRpcMessage::Notification(notif) => {
                self.handle_notification(notif);
                None
            }
            JsonRpcMessage::Response(_) => {
                warn!("upstream sent a response frame, ignoring");
                None
            }
        }
    }

    fn handle_notification(&mut self, notif: JsonRpcNotification) {
        debug!(method = %notif.method, "upstream notification");
    }

    async fn handle_request(&mut self, req: JsonRpcRequest) -> JsonRpcResponse {
        debug!(method = %req.method, "dispatching request");
        match req.method.as_str() {
            "initialize" => self.handle_initialize(req),
            "tools/list" => self.handle_tools_list(req).await,
            "tools/call" => self.handle_tools_call(req).await,
            other => error_response(req.id, Error::MethodNotFound(other.to_string())),
        }
    }

    fn handle_initialize(&mut self, req: JsonRpcRequest) -> JsonRpcResponse {
        self.initialized = true;
        JsonRpcResponse::ok(
            req.id,
            json!({
                "protocolVersion": "2024-11-05",
                "capabilities": {"tools": {}},
                "serverInfo": {"name": "funnel-mcp", "version": env!("CARGO_PKG_VERSION")},
            }),
        )
    }

    async fn handle_tools_list(&self, req: JsonRpcRequest) -> JsonRpcResponse {
        let mut tools: Vec<Value> = self
            .proxy
            .list_tools()
            .await
            .into_iter()
            .map(|t| {
                json!({
                    "name": t.full_name,
                    "description": t.description,
                    "inputSchema": t.input_schema,
                })
            })
            .collect();
        tools.extend(core_tool_descriptors(self.debugger_enabled));
        JsonRpcResponse::ok(req.id, json!({"tools": tools}))
    }

    async fn handle_tools_call(&self, req: JsonRpcRequest) -> JsonRpcResponse {
        let params = match &req.params {
            Some(p) => p.clone(),
            None => return error_response(req.id, Error::InvalidRequest("missing params".to_string())),
        };
        let name = params.get("name").and_then(|v| v.as_str()).unwrap_or("").to_string();
        let arguments = params.get("arguments").cloned().unwrap_or(Value::Null);

        let result = if PROXY_CORE_TOOLS.contains(&name.as_str()) {
            self.dispatch_proxy_management_tool(&name, arguments).await
        } else if self.debugger_enabled && DEBUGGER_CORE_TOOLS.contains(&name.as_str()) {
            self.dispatch_debugger_tool(&name, arguments).await
        } else if DEBUGGER_CORE_TOOLS.contains(&name.as_str()) {
            Err(Error::InvalidState(
                "debugger operations are disabled; start the server with --debugger".to_string(),
            ))
        } else {
            self.proxy.call_tool(&name, arguments).await
        };

        match result {
            Ok(value) => JsonRpcResponse::ok(
                req.id,
                json!({"content": [{"type": "text", "text": serde_json::to_string(&value).unwrap_or_default()}]}),
            ),
            Err(e) => error_response(req.id, e),
        }
    }

    async fn dispatch_debugger_tool(&self, name: &str, args: Value) -> crate::Result<Value> {
        match name {
            "debugger__start_session" => {
                let config = parse_session_config(&args)?;
                let id = self.sessions.create_session(config).await?;
                Ok(json!({"sessionId": id}))
            }
            "debugger__list_sessions" => Ok(json!({"sessions": self.sessions.list_sessions().await})),
            "debugger__stop_session" => {
                let id = session_id(&args)?;
                self.sessions.stop_session(&id).await?;
                Ok(json!({"stopped": id}))
            }
            "debugger__cleanup_sessions" => {
                let force = args.get("force").and_then(|v| v.as_bool()).unwrap_or(false);
                let dry_run = args.get("dryRun").and_then(|v| v.as_bool()).unwrap_or(false);
                let report = self
                    .sessions
                    .cleanup_sessions(crate::debug::manager::CleanupOptions { force, dry_run })
                    .await;
                Ok(json!({"removed": report.removed, "wouldRemove": report.would_remove}))
            }
            "debugger__continue" => {
                let session = self.sessions.get_session(&session_id(&args)?).await?;
                session.resume().await?;
                Ok(json!({"state": "resumed"}))
            }
            "debugger__pause" => {
                let session = self.sessions.get_session(&session_id(&args)?).await?;
                session.pause().await?;
                Ok(json!({"state": "paused"}))
            }
            "debugger__step_over" => {
                let session = self.sessions.get_session(&session_id(&args)?).await?;
                session.step_over().await?;
                Ok(json!({"state": "stepped"}))
            }
            "debugger__step_into" => {
                let session = self.sessions.get_session(&session_id(&args)?).await?;
                session.step_into().await?;
                Ok(json!({"state": "stepped"}))
            }
            "debugger__step_out" => {
                let session = self.sessions.get_session(&session_id(&args)?).await?;
                session.step_out().await?;
                Ok(json!({"state": "stepped"}))
            }
            "debugger__continue_to_location" => {
                let session = self.sessions.get_session(&session_id(&args)?).await?;
                let script_id = field_str(&args, "scriptId")?;
                let line = field_u32(&args, "lineNumber")?;
                let column = args.get("columnNumber").and_then(|v| v.as_u64()).map(|v| v as u32);
                session
                    .continue_to_location(Location {
                        script_id,
                        line_number: line,
                        column_number: column,
                    })
                    .await?;
                Ok(json!({"state": "resumed"}))
            }
            "debugger__set_breakpoint" => {
                let session = self.sessions.get_session(&session_id(&args)?).await?;
                let spec: BreakpointSpec = serde_json::from_value(args.get("breakpoint").cloned().unwrap_or(Value::Null))
                    .map_err(|e| Error::InvalidRequest(format!("invalid breakpoint: {e}")))?;
                let id = session.set_breakpoint(spec).await?;
                Ok(json!({"breakpointId": id}))
            }
            "debugger__remove_breakpoint" => {
                let session = self.sessions.get_session(&session_id(&args)?).await?;
                let bp_id = field_str(&args, "breakpointId")?;
                session.remove_breakpoint(&bp_id).await?;
                Ok(json!({"removed": bp_id}))
            }
            "debugger__get_stacktrace" => {
                let session = self.sessions.get_session(&session_id(&args)?).await?;
                Ok(json!({"callFrames": session.get_stacktrace().await}))
            }
            "debugger__get_scopes" => {
                let session = self.sessions.get_session(&session_id(&args)?).await?;
                let frame_idx = args.get("frameIndex").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
                let include_global = args.get("includeGlobal").and_then(|v| v.as_bool()).unwrap_or(false);
                let scopes = session.get_scopes(frame_idx, include_global).await?;
                Ok(json!({"scopes": scopes}))
            }
            "debugger__get_variables" => {
                let session = self.sessions.get_session(&session_id(&args)?).await?;
                let path = field_str(&args, "path")?;
                let frame_idx = args.get("frameIndex").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
                let max_depth = args.get("maxDepth").and_then(|v| v.as_u64()).map(|v| v as usize);
                session.get_variables(&path, frame_idx, max_depth).await
            }
            "debugger__evaluate" => {
                let session = self.sessions.get_session(&session_id(&args)?).await?;
                let expression = field_str(&args, "expression")?;
                session.evaluate(&expression).await
            }
            "debugger__search_console_output" => {
                let session = self.sessions.get_session(&session_id(&args)?).await?;
                let query = field_str(&args, "query")?;
                Ok(json!({"matches": session.search_console_output(&query).await}))
            }
            other => Err(Error::MethodNotFound(other.to_string())),
        }
    }

    /// `funnel__*` tools (spec §4.10: `getTargetServers`, `getServerStatus`,
    /// `reconnectServer`, `disconnectServer`), exposed as read-only JSON
    /// status snapshots per the status-snapshot supplement.
    async fn dispatch_proxy_management_tool(&self, name: &str, args: Value) -> crate::Result<Value> {
        match name {
            "funnel__list_servers" => Ok(json!({"servers": self.proxy.get_target_servers()})),
            "funnel__server_status" => {
                let name = field_str(&args, "name")?;
                let state = self.proxy.get_server_status(&name).await?;
                Ok(json!({"server": name, "state": connection_state_json(&state)}))
            }
            "funnel__reconnect_server" => {
                let name = field_str(&args, "name")?;
                self.proxy.reconnect_server(&name).await?;
                Ok(json!({"reconnected": name}))
            }
            "funnel__disconnect_server" => {
                let name = field_str(&args, "name")?;
                self.proxy.disconnect_server(&name).await?;
                Ok(json!({"disconnected": name}))
            }
            other => Err(Error::MethodNotFound(other.to_string())),
        }
    }
}

fn connection_state_json(state: &crate::proxy::ConnectionState) -> Value {
    use crate::proxy::ConnectionState;
    match state {
        ConnectionState::Disconnected { reason } => json!({"status": "disconnected", "reason": reason}),
        ConnectionState::Connecting => json!({"status": "connecting"}),
        ConnectionState::Connected { .. } => json!({"status": "connected"}),
        ConnectionState::Error { message, .. } => json!({"status": "error", "message": message}),
    }
}

fn session_id(args: &Value) -> crate::Result<String> {
    field_str(args, "sessionId")
}

/// Builds a `DebugSessionConfig` from `debugger__start_session` arguments.
/// Either `websocketUrl` (attach) or `runtime` + `entry` (launch) must be
/// present; the two forms mirror `SessionTarget`'s variants directly.
fn parse_session_config(args: &Value) -> crate::Result<DebugSessionConfig> {
    let target = if let Some(url) = args.get("websocketUrl").and_then(|v| v.as_str()) {
        SessionTarget::Attach {
            websocket_url: url.to_string(),
        }
    } else {
        let runtime = field_str(args, "runtime")?;
        let entry = field_str(args, "entry")?;
        let argv = args
            .get("args")
            .and_then(|v| v.as_array())
            .map(|a| a.iter().filter_map(|v| v.as_str().map(str::to_string)).collect())
            .unwrap_or_default();
        let env: HashMap<String, String> = args
            .get("env")
            .and_then(|v| v.as_object())
            .map(|m| {
                m.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default();
        let cwd = args.get("cwd").and_then(|v| v.as_str()).map(str::to_string);
        SessionTarget::Launch {
            runtime,
            entry,
            argv,
            env,
            cwd,
        }
    };

    let initial_breakpoints = args
        .get("breakpoints")
        .and_then(|v| v.as_array())
        .map(|list| {
            list.iter()
                .filter_map(|v| serde_json::from_value::<BreakpointSpec>(v.clone()).ok())
                .collect()
        })
        .unwrap_or_default();

    let mut config = DebugSessionConfig {
        target,
        initial_breakpoints,
        ..DebugSessionConfig::default()
    };
    if let Some(ms) = args.get("timeoutMs").and_then(|v| v.as_u64()) {
        config.timeout = Duration::from_millis(ms);
    }
    if let Some(resume) = args.get("resumeAfterConfigure").and_then(|v| v.as_bool()) {
        config.resume_after_configure = resume;
    }
    Ok(config)
}

fn field_str(args: &Value, field: &str) -> crate::Result<String> {
    args.get(field)
        .and_then(|v| v.as_str())
        .map(str::to_string)
        .ok_or_else(|| Error::InvalidRequest(format!("missing field: {field}")))
}

fn field_u32(args: &Value, field: &str) -> crate::Result<u32> {
    args.get(field)
        .and_then(|v| v.as_u64())
        .map(|v| v as u32)
        .ok_or_else(|| Error::InvalidRequest(format!("missing field: {field}")))
}

fn core_tool_descriptors(debugger_enabled: bool) -> Vec<Value> {
    Dispatcher::core_tool_names(debugger_enabled)
        .into_iter()
        .map(|name| json!({"name": name, "description": null, "inputSchema": {"type": "object"}}))
        .collect()
}

fn error_response(id: Value, error: Error) -> JsonRpcResponse {
    JsonRpcResponse {
        jsonrpc: "2.0".to_string(),
        id,
        result: None,
        error: Some(JsonRpcError {
            code: error.error_code(),
            message: error.to_string(),
            data: None,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(ProxyCore::new(&Config::default()), Arc::new(SessionManager::default()), true)
    }

    #[tokio::test]
    async fn unknown_method_maps_to_method_not_found() {
        let mut d = dispatcher();
        let resp = d
            .handle_request(JsonRpcRequest {
                jsonrpc: "2.0".to_string(),
                id: json!(1),
                method: "bogus/method".to_string(),
                params: None,
            })
            .await;
        assert_eq!(resp.error.unwrap().code, -32601);
    }

    #[tokio::test]
    async fn tools_list_includes_core_debugger_tools() {
        let d = dispatcher();
        let resp = d
            .handle_tools_list(JsonRpcRequest {
                jsonrpc: "2.0".to_string(),
                id: json!(1),
                method: "tools/list".to_string(),
                params: None,
            })
            .await;
        let tools = resp.result.unwrap();
        let names: Vec<_> = tools["tools"].as_array().unwrap().iter().map(|t| t["name"].as_str().unwrap()).collect();
        assert!(names.contains(&"debugger__start_session"));
    }

    #[tokio::test]
    async fn tools_call_with_missing_session_id_is_invalid_request() {
        let d = dispatcher();
        let resp = d
            .handle_tools_call(JsonRpcRequest {
                jsonrpc: "2.0".to_string(),
                id: json!(1),
                method: "tools/call".to_string(),
                params: Some(json!({"name": "debugger__continue", "arguments": {}})),
            })
            .await;
        assert_eq!(resp.error.unwrap().code, -32600);
    }
}
