//! Action handlers and their registry
//!
//! An action is one executable step of a command, event handler, flow, or
//! pipe handler. Handlers implement [`ActionHandler`] and live in the
//! [`ActionRegistry`]; the flow executor resolves each step's name through
//! the registry and captures the result as an
//! [`bw_core::ActionOutcome`]. The builtin set covers replies, logging,
//! delays, variables, scoped state, event emission, and pipe sends.

mod builtin;
mod context;
mod handler;
mod registry;

pub use builtin::register_builtins;
pub use context::ExecutionContext;
pub use handler::{ActionHandler, ActionResult};
pub use registry::{ActionRegistry, SharedActionRegistry};

use thiserror::Error;

/// Errors from executing an action
#[derive(Debug, Error)]
pub enum ActionError {
    #[error("action not found: {0}")]
    NotFound(String),

    #[error("invalid action config: {0}")]
    InvalidConfig(String),

    #[error("action failed: {0}")]
    Failed(String),

    #[error(transparent)]
    State(#[from] bw_state::StateError),

    #[error(transparent)]
    Pipe(#[from] bw_pipes::PipeError),
}
