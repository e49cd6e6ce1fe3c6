//! Persistent WebSocket connector
//!
//! A background task owns the socket: it reconnects with the configured
//! backoff, forwards inbound text frames to the trigger bus, and runs the
//! heartbeat. A missed pong tears the connection down and the backoff
//! sequence restarts from its first step. Exhausting the attempt budget
//! parks the pipe in Failed until an explicit connect call.

use crate::connector::{require_connected, Connector};
use crate::{PipeError, PipeResult, PipeState, PipeStatus, StatusCell};
use async_trait::async_trait;
use bw_bus::SharedTriggerBus;
use bw_core::Trigger;
use bw_spec::BackoffPolicy;
use futures::{Sink, SinkExt, Stream, StreamExt};
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Why a live connection ended
enum Ended {
    Cancelled,
    Lost(String),
}

struct WsShared {
    name: String,
    url: String,
    backoff: BackoffPolicy,
    heartbeat_ms: Option<u64>,
    bus: SharedTriggerBus,
    status: StatusCell,
    outbound: Mutex<Option<mpsc::Sender<Message>>>,
}

/// WebSocket pipe
pub struct WebsocketPipe {
    inner: Arc<WsShared>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl WebsocketPipe {
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        backoff: BackoffPolicy,
        heartbeat_ms: Option<u64>,
        bus: SharedTriggerBus,
    ) -> Self {
        let name = name.into();
        Self {
            inner: Arc::new(WsShared {
                status: StatusCell::new(&name),
                name,
                url: url.into(),
                backoff,
                heartbeat_ms,
                bus,
                outbound: Mutex::new(None),
            }),
            cancel: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Connector for WebsocketPipe {
    fn kind(&self) -> &'static str {
        "websocket"
    }

    fn status(&self) -> PipeStatus {
        self.inner.status.snapshot()
    }

    async fn connect(&self) -> PipeResult<()> {
        match self.inner.status.state() {
            PipeState::Connecting | PipeState::Connected | PipeState::Reconnecting => {
                return Ok(())
            }
            PipeState::Disconnected | PipeState::Failed => {}
        }
        self.inner.status.transition(PipeState::Connecting)?;

        let token = CancellationToken::new();
        *self.cancel.lock().unwrap_or_else(|e| e.into_inner()) = Some(token.clone());

        let shared = self.inner.clone();
        tokio::spawn(run_loop(shared, token));
        Ok(())
    }

    async fn disconnect(&self) -> PipeResult<()> {
        if let Some(token) = self
            .cancel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
        {
            token.cancel();
        }
        *self.inner.outbound.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.inner.status.transition(PipeState::Disconnected)
    }

    async fn send(&self, message: Value) -> PipeResult<Option<Value>> {
        require_connected(&self.inner.name, self.inner.status.state())?;

        let sender = self
            .inner
            .outbound
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let sender = sender.ok_or_else(|| PipeError::Unavailable {
            name: self.inner.name.clone(),
            state: self.inner.status.state(),
        })?;

        let text = match message {
            Value::String(s) => s,
            other => serde_json::to_string(&other)?,
        };
        sender
            .send(Message::Text(text))
            .await
            .map_err(|_| PipeError::Send {
                name: self.inner.name.clone(),
                reason: "connection task gone".to_string(),
            })?;
        Ok(None)
    }
}

/// Reconnect loop; entered in Connecting
async fn run_loop(shared: Arc<WsShared>, token: CancellationToken) {
    loop {
        let attempt_result = tokio::select! {
            _ = token.cancelled() => return,
            result = tokio_tungstenite::connect_async(shared.url.as_str()) => result,
        };

        match attempt_result {
            Ok((stream, _)) => {
                if shared.status.transition(PipeState::Connected).is_err() {
                    return;
                }
                info!(pipe = %shared.name, "WebSocket connected");

                let (tx, rx) = mpsc::channel(64);
                *shared.outbound.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);

                let ended = run_connection(&shared, stream, rx, &token).await;

                *shared.outbound.lock().unwrap_or_else(|e| e.into_inner()) = None;

                match ended {
                    Ended::Cancelled => return,
                    Ended::Lost(reason) => {
                        warn!(pipe = %shared.name, reason = %reason, "WebSocket connection lost");
                        shared.status.record_error(reason);
                        if shared.status.transition(PipeState::Reconnecting).is_err()
                            || shared.status.transition(PipeState::Connecting).is_err()
                        {
                            return;
                        }
                    }
                }
            }
            Err(err) => {
                shared.status.record_error(err.to_string());
                let failures = shared.status.bump_retry();
                if failures >= shared.backoff.max_attempts {
                    warn!(
                        pipe = %shared.name, failures,
                        "Reconnect budget exhausted, pipe failed"
                    );
                    let _ = shared.status.transition(PipeState::Failed);
                    return;
                }

                let delay = shared
                    .backoff
                    .delay(failures)
                    .unwrap_or(Duration::from_millis(shared.backoff.base_ms));
                debug!(
                    pipe = %shared.name, failures, delay_ms = delay.as_millis() as u64,
                    "Connect failed, backing off"
                );
                if shared.status.transition(PipeState::Reconnecting).is_err() {
                    return;
                }
                tokio::select! {
                    _ = token.cancelled() => return,
                    _ = tokio::time::sleep(delay) => {}
                }
                if shared.status.transition(PipeState::Connecting).is_err() {
                    return;
                }
            }
        }
    }
}

/// Drive one live connection until it drops or is cancelled
async fn run_connection<S>(
    shared: &WsShared,
    stream: S,
    mut outbound: mpsc::Receiver<Message>,
    token: &CancellationToken,
) -> Ended
where
    S: Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
        + Sink<Message>
        + Unpin,
{
    let mut stream = stream;
    let mut heartbeat = shared
        .heartbeat_ms
        .map(|ms| tokio::time::interval(Duration::from_millis(ms)));
    if let Some(hb) = heartbeat.as_mut() {
        // First tick fires immediately; consume it so the ping cadence starts
        // one interval from now
        hb.tick().await;
    }
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            _ = token.cancelled() => {
                let _ = stream.send(Message::Close(None)).await;
                return Ended::Cancelled;
            }
            outgoing = outbound.recv() => {
                match outgoing {
                    Some(msg) => {
                        if stream.send(msg).await.is_err() {
                            return Ended::Lost("write failed".to_string());
                        }
                    }
                    None => return Ended::Lost("outbound channel closed".to_string()),
                }
            }
            frame = stream.next() => {
                match frame {
                    Some(Ok(Message::Text(text))) => {
                        let payload = serde_json::from_str(&text)
                            .unwrap_or(Value::String(text));
                        shared.bus.fire(Trigger::pipe_message(&shared.name, payload));
                    }
                    Some(Ok(Message::Ping(data))) => {
                        if stream.send(Message::Pong(data)).await.is_err() {
                            return Ended::Lost("pong write failed".to_string());
                        }
                    }
                    Some(Ok(Message::Pong(_))) => awaiting_pong = false,
                    Some(Ok(Message::Close(_))) | None => {
                        return Ended::Lost("peer closed connection".to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(err)) => return Ended::Lost(err.to_string()),
                }
            }
            _ = crate::connector::tick(heartbeat.as_mut()) => {
                if awaiting_pong {
                    return Ended::Lost("heartbeat missed".to_string());
                }
                awaiting_pong = true;
                if stream.send(Message::Ping(Vec::new())).await.is_err() {
                    return Ended::Lost("ping write failed".to_string());
                }
            }
        }
    }
}
