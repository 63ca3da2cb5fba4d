use std::collections::HashMap;
use std::time::Duration;

use funnel_mcp::config::{Config, ReconnectPolicy, ServerSpec};
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

#[tokio::test]
async fn connects_and_discovers_tools_from_a_child_process() {
    let config = Config::default().with_servers(vec![fake_target_spec("demo")]);
    let core = ProxyCore::new(&config);
    core.connect_all().await;

    let tools = core.list_tools().await;
    let names: Vec<_> = tools.iter().map(|t| t.full_name.clone()).collect();
    assert!(names.contains(&"demo__echo".to_string()));
    assert!(names.contains(&"demo__list_issues".to_string()));
}

#[tokio::test]
async fn call_tool_forwards_arguments_and_strips_namespace_prefix() {
    let config = Config::default().with_servers(vec![fake_target_spec("demo")]);
    let core = ProxyCore::new(&config);
    core.connect_all().await;

    let result = core
        .call_tool("demo__echo", serde_json::json!({"name": "echo", "arguments": {"greeting": "hi"}}))
        .await
        .expect("call_tool should succeed");
    assert_eq!(result["echoed"]["arguments"]["greeting"], "hi");
}

#[tokio::test]
async fn disconnect_then_reconnect_rediscovers_tools() {
    let config = Config::default().with_servers(vec![fake_target_spec("demo")]);
    let core = ProxyCore::new(&config);
    core.connect_all().await;
    assert!(!core.list_tools().await.is_empty());

    core.disconnect_server("demo").await.expect("disconnect should succeed");
    assert!(core.list_tools().await.is_empty());

    core.reconnect_server("demo").await.expect("reconnect should succeed");
    assert!(!core.list_tools().await.is_empty());
}

#[tokio::test]
async fn reconnect_policy_is_carried_from_config() {
    let mut config = Config::default().with_servers(vec![fake_target_spec("demo")]);
    config.auto_reconnect = ReconnectPolicy {
        enabled: true,
        max_attempts: 3,
        initial_delay_ms: 10,
        backoff_multiplier: 2.0,
        max_delay_ms: 100,
    };
    let core = ProxyCore::new(&config);
    core.connect_all().await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!core.get_target_servers().is_empty());
}
