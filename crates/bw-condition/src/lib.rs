//! Condition trees for botwright
//!
//! Conditions are boolean gates evaluated before a handler's action list
//! runs. A condition is a tree of `all`/`any`/`not` composites over
//! expression leaves; a bare string in a document is shorthand for a leaf.
//! Evaluation is read-only: conditions never mutate state.

mod eval;
mod node;

pub use eval::{truthy, ConditionEvaluator};
pub use node::ConditionNode;

use thiserror::Error;

/// Condition errors
#[derive(Debug, Error)]
pub enum ConditionError {
    /// A leaf expression failed to evaluate
    #[error("condition expression failed: {0}")]
    Expr(#[from] bw_expr::ExprError),
}

/// Result type for condition evaluation
pub type ConditionResult<T> = Result<T, ConditionError>;
