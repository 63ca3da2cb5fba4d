//! WebSocket Transport (spec §4.3).
//!
//! Dials a `ws://`/`wss://` URL, sends/receives JSON-RPC frames as single
//! text messages, and surfaces lifecycle events. Owns an optional
//! Reconnection Manager that re-dials the last URL on unexpected
//! disconnect when `autoReconnect` is enabled.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::reconnect::{BackoffParams, ReconnectionManager};
use crate::{Error, Result};

#[derive(Debug, Clone)]
pub enum WsEvent {
    Connected,
    Disconnected(String),
    Reconnecting { attempt: u32, delay_ms: u64 },
    Reconnected,
    Message(Value),
    Error(String),
}

pub struct WsTransportOptions {
    pub connection_timeout: Duration,
    pub auto_reconnect: bool,
    pub backoff: BackoffParams,
}

impl Default for WsTransportOptions {
    fn default() -> Self {
        Self {
            connection_timeout: Duration::from_secs(10),
            auto_reconnect: true,
            backoff: BackoffParams::default(),
        }
    }
}

/// A connected WebSocket channel with auto-reconnect. Cloning shares the
/// same outbound channel and event bus; there is exactly one active socket
/// per instance at a time (single-writer).
#[derive(Clone)]
pub struct WsTransport {
    url: Url,
    write_tx: Arc<Mutex<Option<mpsc::UnboundedSender<WsMessage>>>>,
    events: broadcast::Sender<WsEvent>,
    manual_close: Arc<AtomicBool>,
    reconnect: Arc<ReconnectionManager>,
    options: Arc<WsTransportOptions>,
}

impl WsTransport {
    /// Validates the URL scheme, dials within `connection_timeout`, and
    /// returns a connected transport plus its event stream.
    pub async fn connect(url: &str, options: WsTransportOptions) -> Result<(Self, broadcast::Receiver<WsEvent>)> {
        let parsed = Url::parse(url).map_err(|e| Error::InvalidUrl(format!("{url}: {e}")))?;
        if parsed.scheme() != "ws" && parsed.scheme() != "wss" {
            return Err(Error::InvalidUrl(format!(
                "unsupported scheme {:?}, expected ws or wss",
                parsed.scheme()
            )));
        }

        let (events_tx, events_rx) = broadcast::channel(256);
        let options = Arc::new(options);
        let transport = Self {
            url: parsed,
            write_tx: Arc::new(Mutex::new(None)),
            events: events_tx,
            manual_close: Arc::new(AtomicBool::new(false)),
            reconnect: Arc::new(ReconnectionManager::new(options.backoff, url.to_string())),
            options,
        };

        transport.dial_and_spawn().await?;
        Ok((transport, events_rx))
    }

    async fn dial_and_spawn(&self) -> Result<()> {
        let (stream, _response) = tokio::time::timeout(
            self.options.connection_timeout,
            tokio_tungstenite::connect_async(self.url.as_str()),
        )
        .await
        .map_err(|_| Error::ConnectionTimeout(self.options.connection_timeout))?
        .map_err(|e| Error::Transport(format!("dial failed: {e}")))?;

        let (mut sink, mut stream) = stream.split();
        let (write_tx, mut write_rx) = mpsc::unbounded_channel::<WsMessage>();
        *self.write_tx.lock().await = Some(write_tx);

        let events_writer = self.events.clone();
        tokio::spawn(async move {
            while let Some(msg) = write_rx.recv().await {
                if let Err(e) = sink.send(msg).await {
                    error!("websocket write failed: {e}");
                    let _ = events_writer.send(WsEvent::Error(e.to_string()));
                    break;
                }
            }
        });

        let events_reader = self.events.clone();
        let this = self.clone();
        tokio::spawn(async move {
            loop {
                match stream.next().await {
                    Some(Ok(WsMessage::Text(text))) => {
                        debug!("websocket frame received ({} bytes)", text.len());
                        match serde_json::from_str::<Value>(&text) {
                            Ok(value) => {
                                let _ = events_reader.send(WsEvent::Message(value));
                            }
                            Err(e) => {
                                warn!("dropping malformed CDP frame: {e}");
                            }
                        }
                    }
                    Some(Ok(WsMessage::Close(frame))) => {
                        info!("websocket closed by peer: {:?}", frame);
                        break;
                    }
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        error!("websocket read error: {e}");
                        let _ = events_reader.send(WsEvent::Error(e.to_string()));
                        break;
                    }
                    None => break,
                }
            }

            *this.write_tx.lock().await = None;
            let reason = "connection lost".to_string();
            let _ = events_reader.send(WsEvent::Disconnected(reason.clone()));

            if this.manual_close.load(Ordering::SeqCst) {
                return;
            }
            if !this.options.auto_reconnect {
                return;
            }
            this.run_reconnect_loop().await;
        });

        let _ = self.events.send(WsEvent::Connected);
        Ok(())
    }

    async fn run_reconnect_loop(&self) {
        let this = self.clone();
        let events = self.events.clone();
        let this_for_action = this.clone();
        let events_for_attempt = events.clone();
        let events_for_exhausted = events.clone();

        self.reconnect
            .schedule(
                move || {
                    let this = this_for_action.clone();
                    async move { this.dial_and_spawn().await.map_err(|e| e.to_string()) }
                },
                move |attempt, delay| {
                    let _ = events_for_attempt.send(WsEvent::Reconnecting {
                        attempt,
                        delay_ms: delay.as_millis() as u64,
                    });
                },
                move || {
                    let _ = events_for_exhausted.send(WsEvent::Error(
                        "reconnection attempts exhausted".to_string(),
                    ));
                },
            )
            .await;

        // `schedule`'s action only reports success/failure via the Err
        // string channel; emit `Reconnected` once the dial actually lands.
        if self.write_tx.lock().await.is_some() {
            let _ = events.send(WsEvent::Reconnected);
        }
    }

    /// Sends `value` as a single JSON text frame. Fails immediately if the
    /// socket is currently disconnected (mid-reconnect or closed).
    pub async fn send(&self, value: &Value) -> Result<()> {
        let guard = self.write_tx.lock().await;
        let tx = guard
            .as_ref()
            .ok_or_else(|| Error::Transport("send on closed websocket".to_string()))?;
        let text = serde_json::to_string(value)?;
        tx.send(WsMessage::Text(text))
            .map_err(|_| Error::Transport("websocket write channel closed".to_string()))
    }

    /// Closes the socket and disables auto-reconnect for the remainder of
    /// the close sequence.
    pub async fn close(&self) -> Result<()> {
        self.manual_close.store(true, Ordering::SeqCst);
        self.reconnect.cancel().await;
        if let Some(tx) = self.write_tx.lock().await.take() {
            let _ = tx.send(WsMessage::Close(None));
        }
        Ok(())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<WsEvent> {
        self.events.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn rejects_non_ws_scheme() {
        let result = WsTransport::connect("http://localhost:9229", WsTransportOptions::default()).await;
        assert!(matches!(result, Err(Error::InvalidUrl(_))));
    }
}
