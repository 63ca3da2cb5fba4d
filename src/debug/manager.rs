//! Session Manager (spec §4.7): indexes live Debug Sessions by id, creates
//! new ones, and evicts idle sessions on a background timer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use uuid::Uuid;

use crate::debug::session::{DebugSession, DebugSessionConfig};
use crate::debug::state::SessionState;
use crate::{Error, Result};

const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30 * 60);
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Default, Clone)]
pub struct CleanupOptions {
    pub force: bool,
    pub dry_run: bool,
}

#[derive(Debug, Clone)]
pub struct CleanupReport {
    pub removed: Vec<String>,
    pub would_remove: Vec<String>,
}

pub struct SessionManager {
    sessions: Arc<RwLock<HashMap<String, Arc<DebugSession>>>>,
    idle_timeout: Duration,
    cleanup_task: RwLock<Option<JoinHandle<()>>>,
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TIMEOUT)
    }
}

impl SessionManager {
    pub fn new(idle_timeout: Duration) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            idle_timeout,
            cleanup_task: RwLock::new(None),
        }
    }

    /// Starts the idle-cleanup background loop. Idempotent: calling twice
    /// replaces the previous task rather than stacking a second one.
    pub async fn start_idle_cleanup(self: &Arc<Self>) {
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CLEANUP_INTERVAL);
            loop {
                ticker.tick().await;
                let report = this.cleanup_sessions(CleanupOptions::default()).await;
                if !report.removed.is_empty() {
                    info!("idle cleanup removed {} session(s)", report.removed.len());
                }
            }
        });
        *self.cleanup_task.write().await = Some(handle);
    }

    pub async fn stop_idle_cleanup(&self) {
        if let Some(handle) = self.cleanup_task.write().await.take() {
            handle.abort();
        }
    }

    pub async fn create_session(&self, config: DebugSessionConfig) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        let session = DebugSession::connect(id.clone(), config).await?;
        self.sessions.write().await.insert(id.clone(), session);
        Ok(id)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Arc<DebugSession>> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| Error::SessionNotFound(session_id.to_string()))
    }

    pub async fn list_sessions(&self) -> Vec<String> {
        self.sessions.read().await.keys().cloned().collect()
    }

    pub async fn stop_session(&self, session_id: &str) -> Result<()> {
        let session = self.get_session(session_id).await?;
        session.disconnect().await?;
        self.sessions.write().await.remove(session_id);
        Ok(())
    }

    /// Blocks until the session reaches `Paused`, `Terminated`, or the
    /// timeout elapses, polling rather than wiring a dedicated notifier —
    /// callers of this are infrequent (one per debugger tool call) and the
    /// session already exposes cheap state reads.
    pub async fn wait_for_pause(&self, session_id: &str, timeout: Duration) -> Result<SessionState> {
        let session = self.get_session(session_id).await?;
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let state = session.get_state().await;
            if state.is_paused() || state.is_terminal() {
                return Ok(state);
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(Error::RequestTimeout(timeout));
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    pub async fn cleanup_sessions(&self, opts: CleanupOptions) -> CleanupReport {
        let mut report = CleanupReport {
            removed: Vec::new(),
            would_remove: Vec::new(),
        };

        let candidates: Vec<(String, Arc<DebugSession>)> = {
            let sessions = self.sessions.read().await;
            sessions.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };

        for (id, session) in candidates {
            let state = session.get_state().await;
            let idle_for = session.last_activity().await.elapsed();
            let should_remove = opts.force || state.is_terminal() || idle_for >= self.idle_timeout;
            if !should_remove {
                continue;
            }
            if opts.dry_run {
                report.would_remove.push(id);
                continue;
            }
            if let Err(e) = session.disconnect().await {
                warn!(session = %id, "error disconnecting during cleanup: {e}");
            }
            self.sessions.write().await.remove(&id);
            report.removed.push(id);
        }

        report
    }
}
