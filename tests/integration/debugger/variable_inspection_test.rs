//! Exercises scope/variable inspection and expression evaluation (spec
//! §4.6 Inspection, Evaluation) against `fake_cdp_endpoint`.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use funnel_mcp::debug::{DebugSession, DebugSessionConfig, SessionTarget};

struct FakeCdp {
    child: Child,
    ws_url: String,
}

async fn spawn_fake_cdp() -> FakeCdp {
    let mut child = Command::new(env!("CARGO_BIN_EXE_fake_cdp_endpoint"))
        .stdout(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .expect("spawn fake_cdp_endpoint");

    let stdout = child.stdout.take().expect("piped stdout");
    let mut lines = BufReader::new(stdout).lines();
    let ws_url = tokio::time::timeout(Duration::from_secs(5), lines.next_line())
        .await
        .expect("fake_cdp_endpoint printed a url in time")
        .expect("read stdout line")
        .expect("fake_cdp_endpoint printed its ws url");

    FakeCdp { child, ws_url }
}

impl Drop for FakeCdp {
    fn drop(&mut self) {
        let _ = self.child.start_kill();
    }
}

async fn connect(id: &str, fake: &FakeCdp) -> std::sync::Arc<DebugSession> {
    let mut config = DebugSessionConfig::default();
    config.target = SessionTarget::Attach {
        websocket_url: fake.ws_url.clone(),
    };
    DebugSession::connect(id.to_string(), config).await.expect("connect")
}

#[tokio::test]
async fn get_scopes_returns_the_local_scope_of_the_top_frame() {
    let fake = spawn_fake_cdp().await;
    let session = connect("v1", &fake).await;

    let scopes = session.get_scopes(0, false).await.expect("get_scopes should succeed while paused");
    assert_eq!(scopes.len(), 1);
    assert_eq!(scopes[0].scope_type, "local");
}

#[tokio::test]
async fn get_variables_resolves_a_scalar_property_on_the_local_scope() {
    let fake = spawn_fake_cdp().await;
    let session = connect("v2", &fake).await;

    let value = session
        .get_variables("x", 0, None)
        .await
        .expect("get_variables should resolve the x property");
    assert_eq!(value, serde_json::json!(42));
}

#[tokio::test]
async fn get_variables_on_an_unknown_path_is_an_error() {
    let fake = spawn_fake_cdp().await;
    let session = connect("v3", &fake).await;

    let result = session.get_variables("does_not_exist", 0, None).await;
    assert!(result.is_err());
}

#[tokio::test]
async fn evaluate_while_paused_uses_the_active_call_frame() {
    let fake = spawn_fake_cdp().await;
    let session = connect("v4", &fake).await;

    let value = session.evaluate("1 + 1").await.expect("evaluate should succeed");
    assert_eq!(value, serde_json::json!(7));
}

#[tokio::test]
async fn search_console_output_is_empty_before_any_console_api_call() {
    let fake = spawn_fake_cdp().await;
    let session = connect("v5", &fake).await;

    assert!(session.search_console_output("anything").await.is_empty());
}
