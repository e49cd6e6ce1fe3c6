//! Normalized trigger envelope
//!
//! A Trigger is an inbound occurrence that initiates dispatch: a command
//! invocation, a platform event, a message arriving on a pipe, or a
//! scheduled job firing. The gateway and the pipe connectors all normalize
//! into this one envelope before anything touches the dispatcher.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Context;

/// The kind of occurrence that produced a trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerKind {
    /// A user invoked a command
    Command,
    /// A platform event was delivered by the gateway
    Event,
    /// A message arrived on a configured pipe
    PipeMessage,
    /// A scheduled job fired
    Schedule,
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TriggerKind::Command => "command",
            TriggerKind::Event => "event",
            TriggerKind::PipeMessage => "pipe_message",
            TriggerKind::Schedule => "schedule",
        };
        write!(f, "{}", s)
    }
}

/// A normalized inbound occurrence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trigger {
    /// What kind of occurrence this is
    pub kind: TriggerKind,

    /// Command name, event name, pipe name, or schedule id
    pub name: String,

    /// Payload data (command options, event payload, pipe message)
    pub payload: serde_json::Value,

    /// Context tracking origin and causality
    pub context: Context,

    /// When the trigger was fired
    pub fired_at: DateTime<Utc>,
}

impl Trigger {
    /// Create a new trigger with the current timestamp
    pub fn new(
        kind: TriggerKind,
        name: impl Into<String>,
        payload: serde_json::Value,
        context: Context,
    ) -> Self {
        Self {
            kind,
            name: name.into(),
            payload,
            context,
            fired_at: Utc::now(),
        }
    }

    /// Shorthand for an event trigger
    pub fn event(name: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(TriggerKind::Event, name, payload, Context::new())
    }

    /// Shorthand for a command trigger
    pub fn command(name: impl Into<String>, options: serde_json::Value, context: Context) -> Self {
        Self::new(TriggerKind::Command, name, options, context)
    }

    /// Shorthand for a pipe message trigger
    pub fn pipe_message(pipe: impl Into<String>, payload: serde_json::Value) -> Self {
        Self::new(TriggerKind::PipeMessage, pipe, payload, Context::new())
    }
}
