//! External connectors ("pipes")
//!
//! A pipe is a configured integration connector: HTTP, WebSocket, MQTT,
//! TCP/UDP, inbound webhook, database, or file-watch. Each connector owns
//! its resilience policy (retry, rate limit, reconnect backoff, payload
//! verification) and moves through the connection state machine in
//! [`PipeState`]. Inbound messages surface as pipe-message triggers on the
//! shared bus; the manager never queues sends for a pipe that has exhausted
//! its reconnect budget.

mod connector;
mod database;
mod file_watch;
mod http;
mod manager;
mod mqtt;
mod state;
mod tcp;
mod udp;
mod webhook;
mod websocket;

pub use connector::Connector;
pub use database::DatabasePipe;
pub use file_watch::FileWatchPipe;
pub use http::HttpPipe;
pub use manager::{PipeManager, SharedPipeManager};
pub use mqtt::MqttPipe;
pub use state::{PipeState, PipeStatus, StatusCell};
pub use tcp::TcpPipe;
pub use udp::UdpPipe;
pub use webhook::WebhookPipe;
pub use websocket::WebsocketPipe;

use thiserror::Error;

/// Errors from pipe operations
#[derive(Debug, Error)]
pub enum PipeError {
    #[error("pipe not found: {0}")]
    NotFound(String),

    #[error("pipe '{name}' is {state}, send refused")]
    Unavailable { name: String, state: PipeState },

    #[error("pipe '{name}' cannot move from {from} to {to}")]
    InvalidTransition {
        name: String,
        from: PipeState,
        to: PipeState,
    },

    #[error("rate limit exceeded on pipe '{name}'")]
    RateLimitExceeded { name: String },

    #[error("connect failed on pipe '{name}': {reason}")]
    Connect { name: String, reason: String },

    #[error("send failed on pipe '{name}': {reason}")]
    Send { name: String, reason: String },

    #[error("webhook verification failed on pipe '{name}': {reason}")]
    Verification { name: String, reason: String },

    #[error("pipe '{name}' does not support {operation}")]
    NotSupported {
        name: String,
        operation: &'static str,
    },

    #[error("malformed pipe message: {0}")]
    BadMessage(String),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Result type for pipe operations
pub type PipeResult<T> = Result<T, PipeError>;
