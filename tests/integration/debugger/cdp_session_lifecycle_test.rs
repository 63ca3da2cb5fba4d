//! Exercises the Debug Session lifecycle (spec §4.6) end to end against
//! `fake_cdp_endpoint`: connect/handshake, pause/resume, stepping, and
//! termination.

use std::process::Stdio;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

use funnel_mcp::debug::{DebugSession, DebugSessionConfig, SessionState, SessionTarget};

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

fn attach_config() -> DebugSessionConfig {
    DebugSessionConfig::default()
}

#[tokio::test]
async fn connect_settles_into_a_resting_state() {
    let fake = spawn_fake_cdp().await;
    let mut config = attach_config();
    config.target = SessionTarget::Attach {
        websocket_url: fake.ws_url.clone(),
    };

    let session = DebugSession::connect("s1".to_string(), config)
        .await
        .expect("connect should complete the handshake");

    let state = session.get_state().await;
    assert!(state.is_paused() || matches!(state, SessionState::Running));
}

#[tokio::test]
async fn resume_then_step_transitions_through_commands() {
    let fake = spawn_fake_cdp().await;
    let mut config = attach_config();
    config.target = SessionTarget::Attach {
        websocket_url: fake.ws_url.clone(),
    };
    let session = DebugSession::connect("s2".to_string(), config).await.expect("connect");

    session.resume().await.expect("resume should succeed");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(session.get_state().await.is_paused());

    session.step_over().await.expect("step_over should succeed");
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(session.get_state().await.is_paused());
}

#[tokio::test]
async fn disconnect_marks_the_session_terminated() {
    let fake = spawn_fake_cdp().await;
    let mut config = attach_config();
    config.target = SessionTarget::Attach {
        websocket_url: fake.ws_url.clone(),
    };
    let session = DebugSession::connect("s3".to_string(), config).await.expect("connect");

    session.disconnect().await.expect("disconnect should succeed");
    assert!(matches!(session.get_state().await, SessionState::Terminated { .. }));
}
