//! Connectionless UDP connector
//!
//! Sends serialize to one datagram each; a background task forwards inbound
//! datagrams to the trigger bus. There is no reconnect policy: UDP has no
//! connection to lose, so the pipe moves straight between Disconnected and
//! Connected.

use crate::connector::{require_connected, Connector};
use crate::{PipeError, PipeResult, PipeState, PipeStatus, StatusCell};
use async_trait::async_trait;
use bw_bus::SharedTriggerBus;
use bw_core::Trigger;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const MAX_DATAGRAM: usize = 65_507;

/// UDP pipe
pub struct UdpPipe {
    name: String,
    addr: String,
    bus: SharedTriggerBus,
    status: StatusCell,
    socket: Mutex<Option<Arc<UdpSocket>>>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl UdpPipe {
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        bus: SharedTriggerBus,
    ) -> Self {
        let name = name.into();
        Self {
            status: StatusCell::new(&name),
            name,
            addr: format!("{}:{}", host.into(), port),
            bus,
            socket: Mutex::new(None),
            cancel: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Connector for UdpPipe {
    fn kind(&self) -> &'static str {
        "udp"
    }

    fn status(&self) -> PipeStatus {
        self.status.snapshot()
    }

    async fn connect(&self) -> PipeResult<()> {
        if self.status.state() == PipeState::Connected {
            return Ok(());
        }
        self.status.transition(PipeState::Connecting)?;

        let socket = match UdpSocket::bind("0.0.0.0:0").await {
            Ok(socket) => socket,
            Err(err) => {
                self.status.record_error(err.to_string());
                self.status.transition(PipeState::Failed)?;
                return Err(PipeError::Connect {
                    name: self.name.clone(),
                    reason: err.to_string(),
                });
            }
        };
        if let Err(err) = socket.connect(&self.addr).await {
            self.status.record_error(err.to_string());
            self.status.transition(PipeState::Failed)?;
            return Err(PipeError::Connect {
                name: self.name.clone(),
                reason: err.to_string(),
            });
        }

        let socket = Arc::new(socket);
        *self.socket.lock().unwrap_or_else(|e| e.into_inner()) = Some(socket.clone());

        let token = CancellationToken::new();
        *self.cancel.lock().unwrap_or_else(|e| e.into_inner()) = Some(token.clone());

        let name = self.name.clone();
        let bus = self.bus.clone();
        tokio::spawn(async move {
            let mut buf = vec![0u8; MAX_DATAGRAM];
            loop {
                tokio::select! {
                    _ = token.cancelled() => return,
                    received = socket.recv(&mut buf) => {
                        match received {
                            Ok(len) => {
                                let text = String::from_utf8_lossy(&buf[..len]).to_string();
                                let payload = serde_json::from_str(&text)
                                    .unwrap_or(Value::String(text));
                                bus.fire(Trigger::pipe_message(&name, payload));
                            }
                            Err(err) => {
                                warn!(pipe = %name, error = %err, "UDP receive failed");
                                return;
                            }
                        }
                    }
                }
            }
        });

        self.status.transition(PipeState::Connected)?;
        info!(pipe = %self.name, addr = %self.addr, "UDP ready");
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
        *self.socket.lock().unwrap_or_else(|e| e.into_inner()) = None;
        self.status.transition(PipeState::Disconnected)
    }

    async fn send(&self, message: Value) -> PipeResult<Option<Value>> {
        require_connected(&self.name, self.status.state())?;

        let socket = self
            .socket
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let socket = socket.ok_or_else(|| PipeError::Unavailable {
            name: self.name.clone(),
            state: self.status.state(),
        })?;

        let data = match message {
            Value::String(s) => s,
            other => serde_json::to_string(&other)?,
        };
        socket.send(data.as_bytes()).await?;
        Ok(None)
    }
}
