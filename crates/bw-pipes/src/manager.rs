//! Pipe manager: builds connectors from definitions and routes operations

use crate::{
    Connector, DatabasePipe, FileWatchPipe, HttpPipe, MqttPipe, PipeError, PipeResult,
    PipeStatus, TcpPipe, UdpPipe, WebhookPipe, WebsocketPipe,
};
use bw_bus::SharedTriggerBus;
use bw_spec::{PipeConfig, PipeDef};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// Owns every configured pipe and routes operations by name
///
/// Connectors are atomic-swapped into the map, so a reader never observes a
/// half-built entry. Registering a name twice replaces the old connector and
/// warns.
pub struct PipeManager {
    pipes: DashMap<String, Arc<dyn Connector>>,
    /// Inbound webhook pipes, kept typed for `admit`
    webhooks: DashMap<String, Arc<WebhookPipe>>,
    bus: SharedTriggerBus,
}

impl PipeManager {
    pub fn new(bus: SharedTriggerBus) -> Self {
        Self {
            pipes: DashMap::new(),
            webhooks: DashMap::new(),
            bus,
        }
    }

    /// Build a manager holding a connector for every definition
    pub fn from_defs(defs: &[PipeDef], bus: SharedTriggerBus) -> Self {
        let manager = Self::new(bus);
        for def in defs {
            manager.register(def);
        }
        manager
    }

    /// Build and install the connector for one definition
    pub fn register(&self, def: &PipeDef) {
        let name = def.name.clone();
        let connector: Arc<dyn Connector> = match &def.config {
            PipeConfig::Http {
                base_url,
                auth,
                rate_limit,
                retry,
                headers,
            } => Arc::new(HttpPipe::new(
                &name,
                base_url.as_str(),
                auth.clone(),
                rate_limit.clone(),
                retry.clone(),
                headers.clone(),
            )),
            PipeConfig::Websocket {
                url,
                backoff,
                heartbeat_ms,
            } => Arc::new(WebsocketPipe::new(
                &name,
                url.as_str(),
                backoff.clone(),
                *heartbeat_ms,
                self.bus.clone(),
            )),
            PipeConfig::Mqtt {
                host,
                port,
                client_id,
                topics,
                backoff,
            } => Arc::new(MqttPipe::new(
                &name,
                host.as_str(),
                *port,
                client_id.as_str(),
                topics.clone(),
                backoff.clone(),
                self.bus.clone(),
            )),
            PipeConfig::Tcp {
                host,
                port,
                backoff,
                heartbeat_ms,
            } => Arc::new(TcpPipe::new(
                &name,
                host.as_str(),
                *port,
                backoff.clone(),
                *heartbeat_ms,
                self.bus.clone(),
            )),
            PipeConfig::Udp { host, port } => {
                Arc::new(UdpPipe::new(&name, host.as_str(), *port, self.bus.clone()))
            }
            PipeConfig::Webhook { verify } => {
                let webhook = Arc::new(WebhookPipe::new(&name, verify.clone(), self.bus.clone()));
                self.webhooks.insert(name.clone(), webhook.clone());
                webhook
            }
            PipeConfig::Database { path } => Arc::new(DatabasePipe::new(&name, path.as_str())),
            PipeConfig::FileWatch { path, poll_ms } => Arc::new(FileWatchPipe::new(
                &name,
                path.clone(),
                *poll_ms,
                self.bus.clone(),
            )),
        };

        info!(pipe = %name, kind = def.config.kind(), "Registered pipe");
        if self.pipes.insert(name.clone(), connector).is_some() {
            warn!(pipe = %name, "Replaced existing pipe registration");
        }
    }

    fn get(&self, name: &str) -> PipeResult<Arc<dyn Connector>> {
        self.pipes
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| PipeError::NotFound(name.to_string()))
    }

    /// Connect one pipe by name
    pub async fn connect(&self, name: &str) -> PipeResult<()> {
        self.get(name)?.connect().await
    }

    /// Disconnect one pipe by name
    pub async fn disconnect(&self, name: &str) -> PipeResult<()> {
        self.get(name)?.disconnect().await
    }

    /// Send a message on one pipe
    ///
    /// Fails fast with [`PipeError::Unavailable`] when the pipe is not
    /// Connected; nothing is queued.
    pub async fn send(&self, name: &str, message: Value) -> PipeResult<Option<Value>> {
        self.get(name)?.send(message).await
    }

    /// Verify and forward an inbound webhook payload
    pub fn admit(
        &self,
        name: &str,
        headers: &HashMap<String, String>,
        body: &[u8],
    ) -> PipeResult<()> {
        let webhook = self
            .webhooks
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| PipeError::NotFound(name.to_string()))?;
        webhook.admit(headers, body)
    }

    /// Current status of one pipe
    pub fn status(&self, name: &str) -> PipeResult<PipeStatus> {
        Ok(self.get(name)?.status())
    }

    /// Connect every registered pipe, logging failures without aborting
    pub async fn connect_all(&self) {
        for name in self.names() {
            if let Err(err) = self.connect(&name).await {
                warn!(pipe = %name, error = %err, "Pipe connect failed");
            }
        }
    }

    /// Disconnect every registered pipe
    pub async fn disconnect_all(&self) {
        for name in self.names() {
            if let Err(err) = self.disconnect(&name).await {
                warn!(pipe = %name, error = %err, "Pipe disconnect failed");
            }
        }
    }

    pub fn names(&self) -> Vec<String> {
        self.pipes.iter().map(|entry| entry.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.pipes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pipes.is_empty()
    }
}

/// Thread-safe wrapper for PipeManager
pub type SharedPipeManager = Arc<PipeManager>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::PipeState;
    use bw_bus::TriggerBus;
    use serde_json::json;

    fn defs() -> Vec<PipeDef> {
        serde_json::from_value(json!([
            {"name": "hook", "kind": "webhook"},
            {"name": "api", "kind": "http", "base_url": "http://127.0.0.1:1"}
        ]))
        .unwrap()
    }

    #[tokio::test]
    async fn test_build_and_lookup() {
        let bus = Arc::new(TriggerBus::new());
        let manager = PipeManager::from_defs(&defs(), bus);
        assert_eq!(manager.len(), 2);
        assert_eq!(
            manager.status("hook").unwrap().state,
            PipeState::Disconnected
        );
        assert!(matches!(
            manager.status("missing"),
            Err(PipeError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_send_on_unknown_pipe() {
        let bus = Arc::new(TriggerBus::new());
        let manager = PipeManager::new(bus);
        let err = manager.send("nope", json!({})).await.unwrap_err();
        assert!(matches!(err, PipeError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_admit_routes_to_webhook() {
        let bus = Arc::new(TriggerBus::new());
        let manager = PipeManager::from_defs(&defs(), bus.clone());
        manager.connect("hook").await.unwrap();

        let mut rx = bus.subscribe("hook");
        manager
            .admit("hook", &HashMap::new(), br#"{"n": 1}"#)
            .unwrap();
        assert_eq!(rx.recv().await.unwrap().payload["n"], 1);

        // http pipes have no admit surface
        assert!(matches!(
            manager.admit("api", &HashMap::new(), b"{}"),
            Err(PipeError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_disconnected_send_fails_fast() {
        let bus = Arc::new(TriggerBus::new());
        let manager = PipeManager::from_defs(&defs(), bus);
        let err = manager.send("api", json!({"path": "/"})).await.unwrap_err();
        assert!(matches!(err, PipeError::Unavailable { .. }));
    }
}
