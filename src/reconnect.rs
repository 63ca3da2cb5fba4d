//! Capped exponential backoff for reconnection attempts.
//!
//! Shared by the Target Server Connection (child-process reconnect) and the
//! WebSocket Transport (CDP endpoint reconnect). Delay for attempt `k` is
//! `min(initialDelayMs * backoffMultiplier^(k-1), maxDelayMs)`.

use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy)]
pub struct BackoffParams {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for BackoffParams {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            max_delay_ms: 60_000,
        }
    }
}

impl BackoffParams {
    /// Delay before attempt `k` (1-based).
    pub fn delay_for_attempt(&self, k: u32) -> Duration {
        let raw = self.initial_delay_ms as f64 * self.backoff_multiplier.powi(k as i32 - 1);
        let capped = raw.min(self.max_delay_ms as f64);
        Duration::from_millis(capped as u64)
    }
}

/// Schedules retry attempts with capped exponential backoff. Only one
/// pending timer may exist at a time; re-arming before it fires replaces it.
/// Single-writer: intended to be owned by the component that manages a
/// single connection's reconnection plan, never shared across connections.
pub struct ReconnectionManager {
    params: BackoffParams,
    attempt: AtomicU32,
    pending: Mutex<Option<JoinHandle<()>>>,
    label: String,
}

impl ReconnectionManager {
    pub fn new(params: BackoffParams, label: impl Into<String>) -> Self {
        Self {
            params,
            attempt: AtomicU32::new(0),
            pending: Mutex::new(None),
            label: label.into(),
        }
    }

    pub fn can_retry(&self) -> bool {
        self.attempt.load(Ordering::SeqCst) < self.params.max_attempts
    }

    /// Resets the attempt counter to zero, as required after a successful
    /// reconnection; the next `schedule` call begins again from attempt 1.
    pub fn reset(&self) {
        self.attempt.store(0, Ordering::SeqCst);
    }

    /// Cancels any pending timer without invoking its action.
    pub async fn cancel(&self) {
        if let Some(handle) = self.pending.lock().await.take() {
            handle.abort();
        }
    }

    /// Arms a one-shot timer that calls `action` on expiry. If `action`
    /// returns `Err`, and `can_retry()` still holds, reschedules the next
    /// attempt; otherwise invokes `on_exhausted`. Re-arming before the
    /// pending timer fires replaces it (the previous handle is aborted).
    pub async fn schedule<F, Fut, E, OnAttempt, OnExhausted>(
        self: &Arc<Self>,
        mut action: F,
        mut on_attempt: OnAttempt,
        on_exhausted: OnExhausted,
    ) where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = std::result::Result<(), E>> + Send,
        E: std::fmt::Display + Send,
        OnAttempt: FnMut(u32, Duration) + Send + 'static,
        OnExhausted: FnOnce() + Send + 'static,
    {
        self.cancel().await;

        let this = Arc::clone(self);
        let handle = tokio::spawn(async move {
            loop {
                let k = this.attempt.fetch_add(1, Ordering::SeqCst) + 1;
                if k > this.params.max_attempts {
                    warn!(server = %this.label, "reconnection attempts exhausted");
                    on_exhausted();
                    return;
                }
                let delay = this.params.delay_for_attempt(k);
                info!(server = %this.label, attempt = k, delay_ms = delay.as_millis() as u64, "scheduling reconnect attempt");
                tokio::time::sleep(delay).await;
                on_attempt(k, delay);

                match action().await {
                    Ok(()) => {
                        this.reset();
                        return;
                    }
                    Err(e) => {
                        warn!(server = %this.label, attempt = k, error = %e, "reconnect attempt failed");
                        continue;
                    }
                }
            }
        });

        *self.pending.lock().await = Some(handle);
    }
}
