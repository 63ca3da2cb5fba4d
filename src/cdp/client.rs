//! CDP Client (spec §4.4). Composes the WebSocket Transport and the
//! JSON-RPC Correlator: forwards `Domain.eventName` frames to subscribers,
//! forwards connection-lifecycle events upward, and clears the correlator
//! on disconnect.

use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::{info, warn};

use crate::rpc::correlator::Correlator;
use crate::rpc::message::{JsonRpcError, JsonRpcMessage, JsonRpcNotification, JsonRpcResponse};
use crate::ws::transport::{WsEvent, WsTransport, WsTransportOptions};
use crate::{Error, Result};

/// Lifecycle events re-exported for callers that want to observe connection
/// state without going through the correlator (e.g. the Debug Session
/// deciding whether the child process should be torn down too).
pub type CdpLifecycleEvent = WsEvent;

#[derive(Clone)]
pub struct CdpClient {
    transport: WsTransport,
    correlator: Arc<Correlator>,
    request_timeout: Duration,
}

impl CdpClient {
    /// Opens the WebSocket, starts the frame pump, and issues no commands
    /// itself — callers (the Debug Session) drive `Runtime.enable` /
    /// `Debugger.enable` after construction.
    pub async fn connect(url: &str, request_timeout: Duration) -> Result<(Self, broadcast::Receiver<WsEvent>)> {
        let (transport, mut ws_events) = WsTransport::connect(
            url,
            WsTransportOptions {
                connection_timeout: Duration::from_secs(10),
                ..Default::default()
            },
        )
        .await?;

        let correlator = Arc::new(Correlator::new(request_timeout));
        let lifecycle_tx = transport.subscribe();

        let pump_correlator = correlator.clone();
        tokio::spawn(async move {
            loop {
                match ws_events.recv().await {
                    Ok(WsEvent::Message(value)) => {
                        if let Some(msg) = decode_frame(value) {
                            pump_correlator.deliver(msg).await;
                        }
                    }
                    Ok(WsEvent::Disconnected(reason)) => {
                        info!("cdp client observed disconnect: {reason}");
                        pump_correlator.close(&reason).await;
                    }
                    Ok(WsEvent::Reconnected) => {
                        info!("cdp client observed reconnect");
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Closed) => break,
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("cdp event bus lagged, dropped {n} events");
                    }
                }
            }
        });

        Ok((
            Self {
                transport,
                correlator,
                request_timeout,
            },
            lifecycle_tx,
        ))
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.correlator.close("client disconnect").await;
        self.transport.close().await
    }

    /// Sends `method` with `params`, awaits its matching response within
    /// `request_timeout`, and deserializes the `result` field into `T`.
    pub async fn send<T: DeserializeOwned>(&self, method: &str, params: Option<Value>) -> Result<T> {
        self.send_with_timeout(method, params, None).await
    }

    pub async fn send_with_timeout<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Option<Value>,
        timeout: Option<Duration>,
    ) -> Result<T> {
        let (id, rx) = self.correlator.begin().await;
        let frame = serde_json::json!({
            "id": id,
            "method": method,
            "params": params.unwrap_or(Value::Object(Default::default())),
        });
        self.transport.send(&frame).await?;
        let value = self
            .correlator
            .await_response(id, rx, timeout.or(Some(self.request_timeout)))
            .await?;
        serde_json::from_value(value).map_err(Error::Json)
    }

    /// Subscribes to a `Domain.eventName` notification.
    pub async fn on<F>(&self, event: &str, handler: F)
    where
        F: Fn(&Value) + Send + Sync + 'static,
    {
        self.correlator.subscribe(event, Box::new(handler)).await;
    }
}

/// Decodes a raw JSON value from the socket into a `JsonRpcMessage`: frames
/// carrying `id` are responses, frames carrying only `method` are events.
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
