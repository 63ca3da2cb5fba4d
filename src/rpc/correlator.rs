//! JSON-RPC Correlator (spec §4.2).
//!
//! Assigns monotonic request IDs, parks awaiters keyed by ID, matches
//! responses, fans out notifications to subscribers, and times out stale
//! requests. Shared by the CDP Client (§4.4) and the Target Server
//! Connection (§4.8) — both need "send a request, await its matching
//! response, separately observe events" over a single multiplexed channel.

use crate::rpc::message::{JsonRpcError, JsonRpcMessage};
use crate::{Error, Result};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, Mutex, RwLock};
use tracing::warn;

type EventHandler = Box<dyn Fn(&Value) + Send + Sync>;

struct Pending {
    tx: oneshot::Sender<std::result::Result<Value, JsonRpcError>>,
}

/// Awaits a previously registered request ID, honoring a deadline.
pub struct Correlator {
    next_id: AtomicI64,
    pending: Mutex<HashMap<i64, Pending>>,
    subscribers: RwLock<HashMap<String, Vec<EventHandler>>>,
    default_timeout: Duration,
}

impl Correlator {
    pub fn new(default_timeout: Duration) -> Self {
        Self {
            next_id: AtomicI64::new(1),
            pending: Mutex::new(HashMap::new()),
            subscribers: RwLock::new(HashMap::new()),
            default_timeout,
        }
    }

    /// Assigns the next strictly increasing ID and registers an awaiter for
    /// it. The caller is responsible for actually writing the frame to the
    /// transport; this only prepares the correlation entry.
    pub async fn begin(&self) -> (i64, oneshot::Receiver<std::result::Result<Value, JsonRpcError>>) {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, Pending { tx });
        (id, rx)
    }

    /// Awaits `rx` with `timeout` (or the correlator's default). On timeout,
    /// removes the pending entry so a late response produces the "unknown
    /// id" warning path rather than a delivery to a stale awaiter.
    pub async fn await_response(
        &self,
        id: i64,
        rx: oneshot::Receiver<std::result::Result<Value, JsonRpcError>>,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let deadline = timeout.unwrap_or(self.default_timeout);
        match tokio::time::timeout(deadline, rx).await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(rpc_err))) => Err(Error::Protocol(format!(
                "request {id} failed: {} (code {})",
                rpc_err.message, rpc_err.code
            ))),
            Ok(Err(_canceled)) => Err(Error::Internal(format!(
                "request {id} awaiter dropped without a response"
            ))),
            Err(_elapsed) => {
                self.pending.lock().await.remove(&id);
                Err(Error::RequestTimeout(deadline))
            }
        }
    }

    /// Subscribes to notifications carrying the given `method` name
    /// (typically a `Domain.eventName` for CDP, or a bare method name for
    /// MCP-style notifications).
    pub async fn subscribe(&self, method: impl Into<String>, handler: EventHandler) {
        self.subscribers
            .write()
            .await
            .entry(method.into())
            .or_default()
            .push(handler);
    }

    /// Delivers an inbound frame: resolves a matching awaiter if the frame
    /// carries an `id`, otherwise fans the frame's `params` out to
    /// subscribers of its `method`. Unknown IDs produce a warning, never a
    /// panic or an `Err` returned to the caller.
    pub async fn deliver(&self, msg: JsonRpcMessage) {
        match msg {
            JsonRpcMessage::Response(resp) => {
                let id = match resp.id.as_i64() {
                    Some(i) => i,
                    None => {
                        warn!(id = ?resp.id, "response with non-integer id, dropping");
                        return;
                    }
                };
                let pending = self.pending.lock().await.remove(&id);
                match pending {
                    Some(p) => {
                        let outcome = match resp.error {
                            Some(e) => Err(e),
                            None => Ok(resp.result.unwrap_or(Value::Null)),
                        };
                        let _ = p.tx.send(outcome);
                    }
                    None => {
                        warn!(id, "response for unknown id, ignoring");
                    }
                }
            }
            JsonRpcMessage::Notification(notif) => {
                let params = notif.params.unwrap_or(Value::Null);
                let subs = self.subscribers.read().await;
                if let Some(handlers) = subs.get(&notif.method) {
                    for h in handlers {
                        h(&params);
                    }
                }
            }
            JsonRpcMessage::Request(req) => {
                warn!(method = %req.method, "correlator received a request frame, ignoring");
            }
        }
    }

    /// Rejects all outstanding awaiters with `reason` and clears the
    /// subscriber table. Used when the owning transport closes.
    pub async fn close(&self, reason: &str) {
        let mut pending = self.pending.lock().await;
        for (id, p) in pending.drain() {
            let _ = p.tx.send(Err(JsonRpcError {
                code: -32000,
                message: format!("channel closed: {reason} (request {id})"),
                data: None,
            }));
        }
        self.subscribers.write().await.clear();
    }
}

/// A `Correlator` paired with the channel identity it serves, constructed
/// fresh per connection episode (it must not outlive a single transport).
pub fn new_shared(default_timeout: Duration) -> Arc<Correlator> {
    Arc::new(Correlator::new(default_timeout))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::message::{JsonRpcNotification, JsonRpcResponse};

    #[tokio::test]
    async fn resolves_matching_response() {
        let c = Correlator::new(Duration::from_secs(1));
        let (id, rx) = c.begin().await;
        c.deliver(JsonRpcMessage::Response(JsonRpcResponse::ok(
            Value::from(id),
            serde_json::json!({"ok": true}),
        )))
        .await;
        let result = c.await_response(id, rx, None).await.unwrap();
        assert_eq!(result, serde_json::json!({"ok": true}));
    }

    #[tokio::test]
    async fn unknown_id_does_not_panic() {
        let c = Correlator::new(Duration::from_secs(1));
        c.deliver(JsonRpcMessage::Response(JsonRpcResponse::ok(
            Value::from(999),
            Value::Null,
        )))
        .await;
    }

    #[tokio::test]
    async fn timeout_removes_pending_entry() {
        let c = Correlator::new(Duration::from_millis(20));
        let (id, rx) = c.begin().await;
        let result = c.await_response(id, rx, None).await;
        assert!(matches!(result, Err(Error::RequestTimeout(_))));
        assert!(!c.pending.lock().await.contains_key(&id));
    }

    #[tokio::test]
    async fn event_fanout_reaches_subscriber() {
        let c = Correlator::new(Duration::from_secs(1));
        let seen = Arc::new(std::sync::Mutex::new(None));
        let seen2 = seen.clone();
        c.subscribe(
            "Debugger.paused",
            Box::new(move |params| {
                *seen2.lock().unwrap() = Some(params.clone());
            }),
        )
        .await;
        c.deliver(JsonRpcMessage::Notification(JsonRpcNotification {
            jsonrpc: "2.0".to_string(),
            method: "Debugger.paused".to_string(),
            params: Some(serde_json::json!({"reason": "breakpoint"})),
        }))
        .await;
        assert_eq!(
            seen.lock().unwrap().clone(),
            Some(serde_json::json!({"reason": "breakpoint"}))
        );
    }

    #[tokio::test]
    async fn close_rejects_outstanding_awaiters() {
        let c = Correlator::new(Duration::from_secs(5));
        let (id, rx) = c.begin().await;
        c.close("server disconnected").await;
        let result = c.await_response(id, rx, None).await;
        assert!(result.is_err());
    }
}
