//! Expression engine for botwright
//!
//! Evaluates the expression language used in gate conditions, action
//! configuration, and `${...}` interpolation templates. Expressions are
//! minijinja expressions evaluated against a per-invocation context.
//!
//! # Key Types
//!
//! - [`ExprEngine`] - compiled environment; `evaluate` (timeout-raced),
//!   `evaluate_sync`, `interpolate`, `render_value`
//! - [`ExprEngineBuilder`] - registers custom functions and transforms
//!   before first use
//! - [`ExprContext`] - name → value bindings for one evaluation

mod context;
mod engine;
mod error;
mod interpolate;

pub use context::ExprContext;
pub use engine::{ExprEngine, ExprEngineBuilder, DEFAULT_TIMEOUT};
pub use error::{ExprError, ExprResult};
pub use interpolate::{display_value, has_tokens};
