//! Persistent TCP connector
//!
//! Line-oriented: each inbound line is parsed as JSON (falling back to a
//! plain string) and forwarded to the trigger bus; each send is serialized
//! onto one line. Reconnects follow the configured backoff, and an optional
//! heartbeat writes a ping line so half-open connections surface as write
//! failures.

use crate::connector::{require_connected, Connector};
use crate::{PipeError, PipeResult, PipeState, PipeStatus, StatusCell};
use async_trait::async_trait;
use bw_bus::SharedTriggerBus;
use bw_core::Trigger;
use bw_spec::BackoffPolicy;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const HEARTBEAT_LINE: &str = "{\"type\":\"ping\"}\n";

enum Ended {
    Cancelled,
    Lost(String),
}

struct TcpShared {
    name: String,
    addr: String,
    backoff: BackoffPolicy,
    heartbeat_ms: Option<u64>,
    bus: SharedTriggerBus,
    status: StatusCell,
    outbound: Mutex<Option<mpsc::Sender<String>>>,
}

/// TCP pipe
pub struct TcpPipe {
    inner: Arc<TcpShared>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl TcpPipe {
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        backoff: BackoffPolicy,
        heartbeat_ms: Option<u64>,
        bus: SharedTriggerBus,
    ) -> Self {
        let name = name.into();
        Self {
            inner: Arc::new(TcpShared {
                status: StatusCell::new(&name),
                name,
                addr: format!("{}:{}", host.into(), port),
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
impl Connector for TcpPipe {
    fn kind(&self) -> &'static str {
        "tcp"
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

        let mut line = match message {
            Value::String(s) => s,
            other => serde_json::to_string(&other)?,
        };
        line.push('\n');
        sender.send(line).await.map_err(|_| PipeError::Send {
            name: self.inner.name.clone(),
            reason: "connection task gone".to_string(),
        })?;
        Ok(None)
    }
}

async fn run_loop(shared: Arc<TcpShared>, token: CancellationToken) {
    loop {
        let attempt_result = tokio::select! {
            _ = token.cancelled() => return,
            result = TcpStream::connect(&shared.addr) => result,
        };

        match attempt_result {
            Ok(stream) => {
                if shared.status.transition(PipeState::Connected).is_err() {
                    return;
                }
                info!(pipe = %shared.name, addr = %shared.addr, "TCP connected");

                let (tx, rx) = mpsc::channel(64);
                *shared.outbound.lock().unwrap_or_else(|e| e.into_inner()) = Some(tx);

                let ended = run_connection(&shared, stream, rx, &token).await;

                *shared.outbound.lock().unwrap_or_else(|e| e.into_inner()) = None;

                match ended {
                    Ended::Cancelled => return,
                    Ended::Lost(reason) => {
                        warn!(pipe = %shared.name, reason = %reason, "TCP connection lost");
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
                    warn!(pipe = %shared.name, failures, "Reconnect budget exhausted, pipe failed");
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

async fn run_connection(
    shared: &TcpShared,
    stream: TcpStream,
    mut outbound: mpsc::Receiver<String>,
    token: &CancellationToken,
) -> Ended {
    let (read_half, mut write_half) = stream.into_split();
    let mut lines = BufReader::new(read_half).lines();
    let mut heartbeat = shared
        .heartbeat_ms
        .map(|ms| tokio::time::interval(Duration::from_millis(ms)));
    if let Some(hb) = heartbeat.as_mut() {
        hb.tick().await;
    }

    loop {
        tokio::select! {
            _ = token.cancelled() => return Ended::Cancelled,
            outgoing = outbound.recv() => {
                match outgoing {
                    Some(line) => {
                        if write_half.write_all(line.as_bytes()).await.is_err() {
                            return Ended::Lost("write failed".to_string());
                        }
                    }
                    None => return Ended::Lost("outbound channel closed".to_string()),
                }
            }
            line = lines.next_line() => {
                match line {
                    Ok(Some(text)) => {
                        let payload = serde_json::from_str(&text)
                            .unwrap_or(Value::String(text));
                        shared.bus.fire(Trigger::pipe_message(&shared.name, payload));
                    }
                    Ok(None) => return Ended::Lost("peer closed connection".to_string()),
                    Err(err) => return Ended::Lost(err.to_string()),
                }
            }
            _ = crate::connector::tick(heartbeat.as_mut()) => {
                if write_half.write_all(HEARTBEAT_LINE.as_bytes()).await.is_err() {
                    return Ended::Lost("heartbeat write failed".to_string());
                }
            }
        }
    }
}
