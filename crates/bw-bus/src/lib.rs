//! Trigger bus with pub/sub fan-out
//!
//! The TriggerBus is the conduit between trigger producers (the gateway
//! collaborator, pipe connectors, the `emit_event` action) and the dispatch
//! loop. Producers fire triggers by name; subscribers receive them over
//! tokio broadcast channels. Firing is fire-and-forget: a trigger with no
//! active receivers is dropped silently.

use bw_core::Trigger;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

/// Default channel capacity for trigger subscriptions
const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// The trigger bus for publishing and subscribing to triggers
pub struct TriggerBus {
    /// Map of trigger names to their broadcast senders
    listeners: DashMap<String, broadcast::Sender<Trigger>>,
    /// Special sender for subscribe-all consumers (the dispatch loop)
    match_all_sender: broadcast::Sender<Trigger>,
    /// Channel capacity
    capacity: usize,
}

impl TriggerBus {
    /// Create a new trigger bus
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Create a new trigger bus with specified channel capacity
    pub fn with_capacity(capacity: usize) -> Self {
        let (match_all_sender, _) = broadcast::channel(capacity);
        Self {
            listeners: DashMap::new(),
            match_all_sender,
            capacity,
        }
    }

    /// Subscribe to triggers with a specific name
    pub fn subscribe(&self, name: impl Into<String>) -> broadcast::Receiver<Trigger> {
        let name = name.into();
        trace!(name = %name, "Subscribing to trigger name");

        self.listeners
            .entry(name)
            .or_insert_with(|| {
                let (tx, _) = broadcast::channel(self.capacity);
                tx
            })
            .subscribe()
    }

    /// Subscribe to all triggers
    pub fn subscribe_all(&self) -> broadcast::Receiver<Trigger> {
        self.match_all_sender.subscribe()
    }

    /// Fire a trigger to all subscribers
    ///
    /// The trigger is delivered to subscribers of its name and to all
    /// subscribe-all consumers. Send errors mean no active receivers and
    /// are ignored.
    pub fn fire(&self, trigger: Trigger) {
        debug!(kind = %trigger.kind, name = %trigger.name, "Firing trigger");

        if let Some(sender) = self.listeners.get(&trigger.name) {
            let _ = sender.send(trigger.clone());
        }

        let _ = self.match_all_sender.send(trigger);
    }

    /// Get the number of distinct trigger names with subscriptions
    pub fn listener_count(&self) -> usize {
        self.listeners.len()
    }
}

impl Default for TriggerBus {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe wrapper for TriggerBus
pub type SharedTriggerBus = Arc<TriggerBus>;

#[cfg(test)]
mod tests {
    use super::*;
    use bw_core::TriggerKind;
    use serde_json::json;

    #[tokio::test]
    async fn test_subscribe_and_fire() {
        let bus = TriggerBus::new();
        let mut rx = bus.subscribe("message_create");

        bus.fire(Trigger::event("message_create", json!({"content": "hi"})));

        let received = rx.recv().await.unwrap();
        assert_eq!(received.name, "message_create");
        assert_eq!(received.payload["content"], "hi");
    }

    #[tokio::test]
    async fn test_subscribe_all_sees_everything() {
        let bus = TriggerBus::new();
        let mut rx = bus.subscribe_all();

        bus.fire(Trigger::event("a", json!({})));
        bus.fire(Trigger::pipe_message("feed", json!({"n": 1})));

        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();

        assert_eq!(first.name, "a");
        assert_eq!(second.kind, TriggerKind::PipeMessage);
    }

    #[tokio::test]
    async fn test_no_cross_name_delivery() {
        let bus = TriggerBus::new();
        let mut rx_a = bus.subscribe("a");
        let mut rx_b = bus.subscribe("b");

        bus.fire(Trigger::event("a", json!({"from": "a"})));

        let received = rx_a.recv().await.unwrap();
        assert_eq!(received.payload["from"], "a");
        assert!(rx_b.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = TriggerBus::new();
        let mut rx1 = bus.subscribe("tick");
        let mut rx2 = bus.subscribe("tick");

        bus.fire(Trigger::event("tick", json!({"n": 1})));

        assert_eq!(rx1.recv().await.unwrap().payload["n"], 1);
        assert_eq!(rx2.recv().await.unwrap().payload["n"], 1);
    }
}
