//! Result of a single action execution

use serde::{Deserialize, Serialize};

/// The result every action execution returns
///
/// Failures are values, not panics: handler and expression errors are
/// captured into the owning flow's outcome list and surfaced to the caller
/// of the command or event, never thrown past the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionOutcome {
    /// Whether the action succeeded
    pub success: bool,

    /// Data produced by the action (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,

    /// Error description when the action failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ActionOutcome {
    /// A successful outcome with no data
    pub fn ok() -> Self {
        Self {
            success: true,
            data: None,
            error: None,
        }
    }

    /// A successful outcome carrying data
    pub fn ok_with(data: serde_json::Value) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// A failed outcome
    pub fn err(error: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(error.into()),
        }
    }
}
