use std::collections::HashMap;
use std::sync::Arc;

use serde_json::json;

use funnel_mcp::config::{Config, ServerSpec};
use funnel_mcp::debug::SessionManager;
use funnel_mcp::mcp::dispatcher::Dispatcher;
use funnel_mcp::mcp::protocol::{JsonRpcMessage, JsonRpcRequest};
use funnel_mcp::proxy::ProxyCore;

fn fake_target_spec(name: &str) -> ServerSpec {
    ServerSpec {
        name: name.to_string(),
        command: env!("CARGO_BIN_EXE_fake_target_server").to_string(),
        args: vec![],
        env: HashMap::new(),
        url: None,
    }
}

async fn dispatcher_with(config: &Config, debugger_enabled: bool) -> Dispatcher {
    let proxy = ProxyCore::new(config);
    proxy
        .set_core_tools(Dispatcher::core_tool_names(debugger_enabled))
        .await;
    proxy.connect_all().await;
    let sessions = Arc::new(SessionManager::new(std::time::Duration::from_secs(60)));
    Dispatcher::new(proxy, sessions, debugger_enabled)
}

fn request(id: i64, method: &str, params: Option<serde_json::Value>) -> JsonRpcMessage {
    JsonRpcMessage::Request(JsonRpcRequest::new(id, method, params))
}

fn ok_result(msg: JsonRpcMessage) -> serde_json::Value {
    match msg {
        JsonRpcMessage::Response(resp) => resp.result.expect("expected a result, got an error response"),
        other => panic!("expected a response, got {other:?}"),
    }
}

fn call_tool(msg: JsonRpcMessage) -> serde_json::Value {
    let result = ok_result(msg);
    let text = result["content"][0]["text"].as_str().expect("tool result content");
    serde_json::from_str(text).expect("tool result content should be JSON")
}

#[tokio::test]
async fn tools_list_includes_proxy_core_tools_regardless_of_debugger_flag() {
    let config = Config::default();
    let mut d = dispatcher_with(&config, false).await;
    let resp = d.handle_message(request(1, "tools/list", None)).await.unwrap();
    let result = ok_result(resp);
    let names: Vec<_> = result["tools"].as_array().unwrap().iter().map(|t| t["name"].as_str().unwrap()).collect();
    assert!(names.contains(&"funnel__list_servers"));
    assert!(!names.contains(&"debugger__start_session"));
}

#[tokio::test]
async fn tools_list_includes_debugger_tools_only_when_enabled() {
    let config = Config::default();
    let mut d = dispatcher_with(&config, true).await;
    let resp = d.handle_message(request(1, "tools/list", None)).await.unwrap();
    let result = ok_result(resp);
    let names: Vec<_> = result["tools"].as_array().unwrap().iter().map(|t| t["name"].as_str().unwrap()).collect();
    assert!(names.contains(&"debugger__start_session"));
    assert!(names.contains(&"funnel__list_servers"));
}

#[tokio::test]
async fn calling_a_debugger_tool_while_disabled_is_invalid_state() {
    let config = Config::default();
    let mut d = dispatcher_with(&config, false).await;
    let resp = d
        .handle_message(request(
            1,
            "tools/call",
            Some(json!({"name": "debugger__list_sessions", "arguments": {}})),
        ))
        .await
        .unwrap();
    match resp {
        JsonRpcMessage::Response(r) => assert_eq!(r.error.unwrap().code, -32006),
        other => panic!("expected a response, got {other:?}"),
    }
}

#[tokio::test]
async fn funnel_management_tools_reach_the_underlying_target_server() {
    let config = Config::default().with_servers(vec![fake_target_spec("demo")]);
    let mut d = dispatcher_with(&config, false).await;

    let list = call_tool(
        d.handle_message(request(1, "tools/call", Some(json!({"name": "funnel__list_servers", "arguments": {}}))))
            .await
            .unwrap(),
    );
    assert_eq!(list["servers"], json!(["demo"]));

    let status = call_tool(
        d.handle_message(request(
            2,
            "tools/call",
            Some(json!({"name": "funnel__server_status", "arguments": {"name": "demo"}})),
        ))
        .await
        .unwrap(),
    );
    assert_eq!(status["state"]["status"], "connected");

    let disconnected = call_tool(
        d.handle_message(request(
            3,
            "tools/call",
            Some(json!({"name": "funnel__disconnect_server", "arguments": {"name": "demo"}})),
        ))
        .await
        .unwrap(),
    );
    assert_eq!(disconnected["disconnected"], "demo");
}

#[tokio::test]
async fn unroutable_tool_name_is_tool_not_found() {
    let config = Config::default();
    let mut d = dispatcher_with(&config, true).await;
    let resp = d
        .handle_message(request(1, "tools/call", Some(json!({"name": "ghost__do_thing", "arguments": {}}))))
        .await
        .unwrap();
    match resp {
        JsonRpcMessage::Response(r) => assert!(r.error.is_some()),
        other => panic!("expected a response, got {other:?}"),
    }
}
