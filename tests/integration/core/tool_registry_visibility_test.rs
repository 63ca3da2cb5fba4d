use std::collections::HashMap;

use funnel_mcp::config::{Config, ServerSpec};
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
async fn default_rules_expose_every_discovered_tool() {
    let config = Config::default().with_servers(vec![fake_target_spec("demo")]);
    let core = ProxyCore::new(&config);
    core.connect_all().await;

    let names: Vec<_> = core.list_tools().await.into_iter().map(|t| t.full_name).collect();
    assert!(names.contains(&"demo__echo".to_string()));
    assert!(names.contains(&"demo__list_issues".to_string()));
}

#[tokio::test]
async fn hide_tools_removes_a_single_tool_from_the_merged_view() {
    let mut config = Config::default().with_servers(vec![fake_target_spec("demo")]);
    config.hide_tools = vec!["demo__list_issues".to_string()];
    let core = ProxyCore::new(&config);
    core.connect_all().await;

    let names: Vec<_> = core.list_tools().await.into_iter().map(|t| t.full_name).collect();
    assert!(names.contains(&"demo__echo".to_string()));
    assert!(!names.contains(&"demo__list_issues".to_string()));
}

#[tokio::test]
async fn expose_tools_narrows_to_an_allowlist() {
    let mut config = Config::default().with_servers(vec![fake_target_spec("demo")]);
    config.expose_tools = vec!["demo__echo".to_string()];
    let core = ProxyCore::new(&config);
    core.connect_all().await;

    let names: Vec<_> = core.list_tools().await.into_iter().map(|t| t.full_name).collect();
    assert_eq!(names, vec!["demo__echo".to_string()]);
}

#[tokio::test]
async fn always_visible_wins_over_an_expose_tools_allowlist() {
    let mut config = Config::default().with_servers(vec![fake_target_spec("demo")]);
    config.expose_tools = vec!["demo__echo".to_string()];
    config.always_visible_tools = vec!["demo__list_issues".to_string()];
    let core = ProxyCore::new(&config);
    core.connect_all().await;

    let names: Vec<_> = core.list_tools().await.into_iter().map(|t| t.full_name).collect();
    assert!(names.contains(&"demo__echo".to_string()));
    assert!(names.contains(&"demo__list_issues".to_string()));
}

#[tokio::test]
async fn expose_core_tools_false_hides_core_tools_from_the_registry() {
    let config = Config::default().with_servers(vec![fake_target_spec("demo")]);
    let core = ProxyCore::new(&config);
    core.set_core_tools(vec!["demo__echo".to_string()]).await;
    core.connect_all().await;

    let stats = core.registry_stats().await;
    assert_eq!(stats.discovered, 2);
    assert_eq!(stats.exposed, 2);
}

#[tokio::test]
async fn disconnecting_a_server_removes_its_tools_from_visibility() {
    let config = Config::default().with_servers(vec![fake_target_spec("demo")]);
    let core = ProxyCore::new(&config);
    core.connect_all().await;
    assert!(!core.list_tools().await.is_empty());

    core.disconnect_server("demo").await.expect("disconnect should succeed");
    assert!(core.list_tools().await.is_empty());

    let stats = core.registry_stats().await;
    assert_eq!(stats.discovered, 0);
}
