//! Pipe connection state machine

use crate::{PipeError, PipeResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, RwLock};

/// Connection lifecycle states
///
/// Failed is terminal for automatic recovery: only an explicit connect call
/// leaves it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipeState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Failed,
}

impl PipeState {
    /// Whether this state may move to `to`
    ///
    /// Any state may move to Disconnected (explicit stop).
    pub fn can_transition(self, to: PipeState) -> bool {
        use PipeState::*;
        match (self, to) {
            (_, Disconnected) => true,
            (Disconnected, Connecting) => true,
            (Failed, Connecting) => true,
            (Connecting, Connected) => true,
            (Connecting, Reconnecting) => true,
            (Connecting, Failed) => true,
            (Connected, Reconnecting) => true,
            (Reconnecting, Connecting) => true,
            _ => false,
        }
    }
}

impl fmt::Display for PipeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PipeState::Disconnected => "disconnected",
            PipeState::Connecting => "connecting",
            PipeState::Connected => "connected",
            PipeState::Reconnecting => "reconnecting",
            PipeState::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// Snapshot of one pipe's connection status
#[derive(Debug, Clone, Serialize)]
pub struct PipeStatus {
    pub state: PipeState,
    pub retry_count: u32,
    pub last_error: Option<String>,
}

impl PipeStatus {
    fn new() -> Self {
        Self {
            state: PipeState::Disconnected,
            retry_count: 0,
            last_error: None,
        }
    }
}

/// Shared, transition-checked status holder
///
/// Every state change goes through `transition`, so a connector can never
/// skip a lifecycle step. Cloning shares the underlying cell.
#[derive(Clone)]
pub struct StatusCell {
    inner: Arc<RwLock<PipeStatus>>,
    name: String,
}

impl StatusCell {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(PipeStatus::new())),
            name: name.into(),
        }
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, PipeStatus> {
        self.inner.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, PipeStatus> {
        self.inner.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn snapshot(&self) -> PipeStatus {
        self.read().clone()
    }

    pub fn state(&self) -> PipeState {
        self.read().state
    }

    /// Move to `to`, rejecting transitions the state machine forbids
    pub fn transition(&self, to: PipeState) -> PipeResult<()> {
        let mut status = self.write();
        if !status.state.can_transition(to) {
            return Err(PipeError::InvalidTransition {
                name: self.name.clone(),
                from: status.state,
                to,
            });
        }
        tracing::debug!(pipe = %self.name, from = %status.state, to = %to, "Pipe state change");
        status.state = to;
        if to == PipeState::Connected || to == PipeState::Disconnected {
            status.retry_count = 0;
        }
        Ok(())
    }

    pub fn record_error(&self, error: impl Into<String>) {
        let mut status = self.write();
        status.last_error = Some(error.into());
    }

    /// Bump the retry counter, returning the new attempt number
    pub fn bump_retry(&self) -> u32 {
        let mut status = self.write();
        status.retry_count += 1;
        status.retry_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_happy_path_transitions() {
        let cell = StatusCell::new("test");
        cell.transition(PipeState::Connecting).unwrap();
        cell.transition(PipeState::Connected).unwrap();
        cell.transition(PipeState::Reconnecting).unwrap();
        cell.transition(PipeState::Connecting).unwrap();
        cell.transition(PipeState::Failed).unwrap();
        assert_eq!(cell.state(), PipeState::Failed);
    }

    #[test]
    fn test_failed_requires_explicit_connect() {
        let cell = StatusCell::new("test");
        cell.transition(PipeState::Connecting).unwrap();
        cell.transition(PipeState::Failed).unwrap();

        // No automatic recovery paths out of Failed
        assert!(cell.transition(PipeState::Connected).is_err());
        assert!(cell.transition(PipeState::Reconnecting).is_err());

        // Manual connect is allowed
        cell.transition(PipeState::Connecting).unwrap();
    }

    #[test]
    fn test_cannot_skip_connecting() {
        let cell = StatusCell::new("test");
        let err = cell.transition(PipeState::Connected).unwrap_err();
        assert!(matches!(err, PipeError::InvalidTransition { .. }));
    }

    #[test]
    fn test_stop_from_anywhere() {
        for target in [
            PipeState::Disconnected,
            PipeState::Connecting,
            PipeState::Connected,
            PipeState::Reconnecting,
            PipeState::Failed,
        ] {
            assert!(target.can_transition(PipeState::Disconnected));
        }
    }

    #[test]
    fn test_retry_count_resets_on_connect() {
        let cell = StatusCell::new("test");
        cell.transition(PipeState::Connecting).unwrap();
        assert_eq!(cell.bump_retry(), 1);
        assert_eq!(cell.bump_retry(), 2);
        cell.transition(PipeState::Connected).unwrap();
        assert_eq!(cell.snapshot().retry_count, 0);
    }
}
