//! Specification document model
//!
//! A Specification is the declarative document describing one bot: its
//! commands, event handlers, flows and pipes. Shape validation beyond what
//! deserialization enforces is an external collaborator's job; once loaded,
//! the document is immutable and its shape is trusted. The only invariant
//! checked here is name uniqueness within each namespace.

mod document;
mod pipe;
mod timing;

pub use document::{
    ActionDef, CommandDef, EventHandlerDef, FlowDef, Specification,
};
pub use pipe::{
    AuthConfig, BackoffKind, BackoffPolicy, PipeConfig, PipeDef, RateLimitConfig, RetryConfig,
    VerifyConfig,
};
pub use timing::{CooldownConfig, DebounceConfig, KeyDimension, ThrottleConfig};

use thiserror::Error;

/// Errors from loading a specification
#[derive(Debug, Error)]
pub enum SpecError {
    #[error("failed to parse specification JSON: {0}")]
    ParseJson(#[from] serde_json::Error),

    #[error("failed to parse specification YAML: {0}")]
    ParseYaml(#[from] serde_yaml::Error),

    #[error("duplicate {kind} name '{name}'")]
    Duplicate { kind: &'static str, name: String },
}

/// Result type for specification operations
pub type SpecResult<T> = Result<T, SpecError>;
