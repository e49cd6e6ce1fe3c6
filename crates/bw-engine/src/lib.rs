//! Flow execution and trigger dispatch
//!
//! The executor runs ordered action lists against one execution context,
//! with an explicit frame stack for called flows, a recursion limit, and
//! cooperative cancellation checked at action boundaries. The dispatcher
//! sits in front: it resolves a trigger to its handlers, gates each through
//! its condition and timing policy, and runs every match in isolation.

mod dispatcher;
mod executor;
mod timing;

pub use dispatcher::{Dispatcher, SharedDispatcher};
pub use executor::{FlowControl, FlowExecutor, FlowOutcome, Frame};
pub use timing::{Debouncer, OnceSet, WindowGate};

use thiserror::Error;

/// Default maximum call-stack depth for flow calls
pub const DEFAULT_MAX_DEPTH: usize = 10;

/// Errors from dispatch and execution
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("command not found: {0}")]
    CommandNotFound(String),

    #[error("flow not found: {0}")]
    FlowNotFound(String),

    #[error("recursion limit exceeded: depth {depth} > max {max}")]
    RecursionLimitExceeded { depth: usize, max: usize },

    #[error(transparent)]
    Condition(#[from] bw_condition::ConditionError),

    #[error(transparent)]
    Expr(#[from] bw_expr::ExprError),

    #[error(transparent)]
    Action(#[from] bw_actions::ActionError),
}

/// Result type for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
