//! Pipe definitions: external connector configuration

use crate::document::ActionDef;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Duration;

/// A configured external connector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipeDef {
    /// Pipe name, unique within the document
    pub name: String,

    /// Connector kind and its settings
    #[serde(flatten)]
    pub config: PipeConfig,

    /// Actions run for every inbound message on this pipe
    #[serde(default)]
    pub on_message: Vec<ActionDef>,
}

/// Connector kinds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipeConfig {
    /// Outbound HTTP requests against a base URL
    Http {
        base_url: String,
        #[serde(default)]
        auth: AuthConfig,
        #[serde(default)]
        rate_limit: Option<RateLimitConfig>,
        #[serde(default)]
        retry: Option<RetryConfig>,
        #[serde(default)]
        headers: HashMap<String, String>,
    },

    /// Persistent WebSocket connection
    Websocket {
        url: String,
        #[serde(default)]
        backoff: BackoffPolicy,
        /// Heartbeat ping interval; a missed pong tears the connection down
        #[serde(default)]
        heartbeat_ms: Option<u64>,
    },

    /// MQTT broker subscription
    Mqtt {
        host: String,
        #[serde(default = "default_mqtt_port")]
        port: u16,
        client_id: String,
        #[serde(default)]
        topics: Vec<String>,
        #[serde(default)]
        backoff: BackoffPolicy,
    },

    /// Persistent TCP stream
    Tcp {
        host: String,
        port: u16,
        #[serde(default)]
        backoff: BackoffPolicy,
        #[serde(default)]
        heartbeat_ms: Option<u64>,
    },

    /// Connectionless UDP datagrams
    Udp { host: String, port: u16 },

    /// Inbound webhook payloads, admitted after verification
    Webhook {
        #[serde(default)]
        verify: Option<VerifyConfig>,
    },

    /// Local SQLite database
    Database { path: String },

    /// Poll a file for modification-time changes
    FileWatch {
        path: String,
        #[serde(default = "default_poll_ms")]
        poll_ms: u64,
    },
}

impl PipeConfig {
    /// Human-readable kind name for logs
    pub fn kind(&self) -> &'static str {
        match self {
            PipeConfig::Http { .. } => "http",
            PipeConfig::Websocket { .. } => "websocket",
            PipeConfig::Mqtt { .. } => "mqtt",
            PipeConfig::Tcp { .. } => "tcp",
            PipeConfig::Udp { .. } => "udp",
            PipeConfig::Webhook { .. } => "webhook",
            PipeConfig::Database { .. } => "database",
            PipeConfig::FileWatch { .. } => "file_watch",
        }
    }
}

fn default_mqtt_port() -> u16 {
    1883
}

fn default_poll_ms() -> u64 {
    1000
}

/// HTTP request authentication
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    #[default]
    None,
    /// Arbitrary header name/value
    Header { name: String, value: String },
    /// `Authorization: Bearer <token>`
    Bearer { token: String },
    /// HTTP basic auth
    Basic {
        username: String,
        #[serde(default)]
        password: Option<String>,
    },
}

/// Outbound request rate limit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    /// Requests permitted per window
    pub max_requests: u32,

    /// Window length in milliseconds
    pub window_ms: u64,

    /// When set, a request over the limit waits this long and retries once
    /// instead of failing fast
    #[serde(default)]
    pub retry_after_ms: Option<u64>,
}

/// Fixed retry policy for transient request failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first
    pub attempts: u32,

    /// Fixed delay between attempts in milliseconds
    pub delay_ms: u64,
}

/// Reconnect delay growth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BackoffKind {
    /// base, base*2, base*4, ...
    #[default]
    Exponential,
    /// base, base*2, base*3, ...
    Linear,
    /// base, base, base, ...
    Fixed,
}

/// Reconnect backoff policy for persistent connections
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffPolicy {
    #[serde(default)]
    pub kind: BackoffKind,

    /// First delay in milliseconds
    #[serde(default = "default_base_ms")]
    pub base_ms: u64,

    /// Ceiling on any single delay
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,

    /// Attempts before the connection is declared Failed
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

fn default_base_ms() -> u64 {
    1000
}

fn default_max_delay_ms() -> u64 {
    30_000
}

fn default_max_attempts() -> u32 {
    5
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            kind: BackoffKind::default(),
            base_ms: default_base_ms(),
            max_delay_ms: default_max_delay_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

impl BackoffPolicy {
    /// Delay before reconnect attempt number `attempt` (1-based)
    ///
    /// Returns None once the attempt budget is exhausted.
    pub fn delay(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let raw = match self.kind {
            BackoffKind::Exponential => self
                .base_ms
                .saturating_mul(1u64 << (attempt - 1).min(63)),
            BackoffKind::Linear => self.base_ms.saturating_mul(attempt as u64),
            BackoffKind::Fixed => self.base_ms,
        };
        Some(Duration::from_millis(raw.min(self.max_delay_ms)))
    }
}

/// Inbound webhook verification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VerifyConfig {
    /// HMAC-SHA256 of the raw body, hex-encoded in a header
    Hmac { header: String, secret: String },

    /// Like Hmac but the header value carries a prefix, e.g. "sha256="
    Signature {
        header: String,
        secret: String,
        prefix: String,
    },

    /// Constant shared token in a header
    Token { header: String, token: String },
}
