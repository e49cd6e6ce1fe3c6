//! MQTT broker connector
//!
//! Wraps a rumqttc client. The event loop runs in a background task:
//! publishes on subscribed topics become pipe-message triggers, and
//! connection errors feed the same backoff/Failed accounting as the other
//! persistent connectors instead of rumqttc's own endless retry.

use crate::connector::{require_connected, Connector};
use crate::{PipeError, PipeResult, PipeState, PipeStatus, StatusCell};
use async_trait::async_trait;
use bw_bus::SharedTriggerBus;
use bw_core::Trigger;
use bw_spec::BackoffPolicy;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

struct MqttShared {
    name: String,
    topics: Vec<String>,
    backoff: BackoffPolicy,
    bus: SharedTriggerBus,
    status: StatusCell,
}

/// MQTT pipe
pub struct MqttPipe {
    inner: Arc<MqttShared>,
    host: String,
    port: u16,
    client_id: String,
    client: Mutex<Option<AsyncClient>>,
    cancel: Mutex<Option<CancellationToken>>,
}

impl MqttPipe {
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        client_id: impl Into<String>,
        topics: Vec<String>,
        backoff: BackoffPolicy,
        bus: SharedTriggerBus,
    ) -> Self {
        let name = name.into();
        Self {
            inner: Arc::new(MqttShared {
                status: StatusCell::new(&name),
                name,
                topics,
                backoff,
                bus,
            }),
            host: host.into(),
            port,
            client_id: client_id.into(),
            client: Mutex::new(None),
            cancel: Mutex::new(None),
        }
    }
}

#[async_trait]
impl Connector for MqttPipe {
    fn kind(&self) -> &'static str {
        "mqtt"
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

        let mut options = MqttOptions::new(&self.client_id, &self.host, self.port);
        options.set_keep_alive(Duration::from_secs(30));
        let (client, eventloop) = AsyncClient::new(options, 64);
        *self.client.lock().unwrap_or_else(|e| e.into_inner()) = Some(client);

        let token = CancellationToken::new();
        *self.cancel.lock().unwrap_or_else(|e| e.into_inner()) = Some(token.clone());

        let shared = self.inner.clone();
        let client = self
            .client
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        tokio::spawn(run_loop(shared, client, eventloop, token));
        Ok(())
    }

    async fn disconnect(&self) -> PipeResult<()> {
        let token = self
            .cancel
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(token) = token {
            token.cancel();
        }

        // Take the client out before awaiting; the guard must not live
        // across the await point
        let client = self
            .client
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take();
        if let Some(client) = client {
            let _ = client.disconnect().await;
        }
        self.inner.status.transition(PipeState::Disconnected)
    }

    async fn send(&self, message: Value) -> PipeResult<Option<Value>> {
        require_connected(&self.inner.name, self.inner.status.state())?;

        let client = self
            .client
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        let client = client.ok_or_else(|| PipeError::Unavailable {
            name: self.inner.name.clone(),
            state: self.inner.status.state(),
        })?;

        let topic = message
            .get("topic")
            .and_then(Value::as_str)
            .ok_or_else(|| PipeError::BadMessage("mqtt send requires 'topic'".to_string()))?
            .to_string();
        let retain = message
            .get("retain")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let payload = match message.get("payload") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => serde_json::to_string(other)?,
            None => String::new(),
        };

        client
            .publish(topic, QoS::AtLeastOnce, retain, payload)
            .await
            .map_err(|err| PipeError::Send {
                name: self.inner.name.clone(),
                reason: err.to_string(),
            })?;
        Ok(None)
    }
}

async fn run_loop(
    shared: Arc<MqttShared>,
    client: Option<AsyncClient>,
    mut eventloop: rumqttc::EventLoop,
    token: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = token.cancelled() => return,
            event = eventloop.poll() => event,
        };

        match event {
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                if shared.status.transition(PipeState::Connected).is_err() {
                    return;
                }
                info!(pipe = %shared.name, "MQTT connected");
                if let Some(client) = &client {
                    for topic in &shared.topics {
                        if let Err(err) = client.subscribe(topic, QoS::AtLeastOnce).await {
                            warn!(pipe = %shared.name, topic = %topic, error = %err, "MQTT subscribe failed");
                        }
                    }
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let text = String::from_utf8_lossy(&publish.payload).to_string();
                let body = serde_json::from_str(&text).unwrap_or(Value::String(text));
                shared.bus.fire(Trigger::pipe_message(
                    &shared.name,
                    json!({"topic": publish.topic, "payload": body}),
                ));
            }
            Ok(_) => {}
            Err(err) => {
                shared.status.record_error(err.to_string());
                // A drop after being connected restarts the backoff sequence
                if shared.status.state() == PipeState::Connected {
                    warn!(pipe = %shared.name, error = %err, "MQTT connection lost");
                    if shared.status.transition(PipeState::Reconnecting).is_err()
                        || shared.status.transition(PipeState::Connecting).is_err()
                    {
                        return;
                    }
                    continue;
                }

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
                    "MQTT connect failed, backing off"
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

#[cfg(test)]
mod tests {
    use super::*;
    use bw_bus::TriggerBus;

    fn pipe() -> MqttPipe {
        MqttPipe::new(
            "broker",
            "127.0.0.1",
            1883,
            "bw-test",
            vec!["alerts".to_string()],
            BackoffPolicy::default(),
            Arc::new(TriggerBus::new()),
        )
    }

    #[tokio::test]
    async fn test_disconnect_from_spawned_task() {
        // Connector futures run inside spawned tasks, which requires Send
        let pipe = Arc::new(pipe());
        let task = tokio::spawn({
            let pipe = pipe.clone();
            async move { pipe.disconnect().await }
        });
        task.await.unwrap().unwrap();
        assert_eq!(pipe.status().state, PipeState::Disconnected);
    }

    #[tokio::test]
    async fn test_send_requires_connection() {
        let err = pipe().send(json!({"topic": "alerts"})).await.unwrap_err();
        assert!(matches!(err, PipeError::Unavailable { .. }));
    }
}
