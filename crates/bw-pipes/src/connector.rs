//! Common connector interface

use crate::{PipeError, PipeResult, PipeState, PipeStatus};
use async_trait::async_trait;
use serde_json::Value;

/// One external integration connector
///
/// Implementations own their connection lifecycle and resilience policy.
/// `send` must fail fast with [`PipeError::Unavailable`] while the pipe is
/// Failed; it never queues against a dead connection.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connector kind for logs ("http", "websocket", ...)
    fn kind(&self) -> &'static str;

    /// Current connection status snapshot
    fn status(&self) -> PipeStatus;

    /// Establish the connection (or mark a stateless pipe ready)
    async fn connect(&self) -> PipeResult<()>;

    /// Tear the connection down and stop background work
    async fn disconnect(&self) -> PipeResult<()>;

    /// Send one message, returning a response when the kind has one
    async fn send(&self, message: Value) -> PipeResult<Option<Value>>;

    fn is_connected(&self) -> bool {
        self.status().state == PipeState::Connected
    }
}

/// Fail-fast guard shared by connectors: refuse sends unless Connected
pub(crate) fn require_connected(name: &str, state: PipeState) -> PipeResult<()> {
    if state == PipeState::Connected {
        Ok(())
    } else {
        Err(PipeError::Unavailable {
            name: name.to_string(),
            state,
        })
    }
}

/// Await the next heartbeat tick, or forever when no heartbeat is configured
pub(crate) async fn tick(interval: Option<&mut tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => futures::future::pending().await,
    }
}
