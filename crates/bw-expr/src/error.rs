//! Error types for expression evaluation

use thiserror::Error;

/// Result type for expression operations
pub type ExprResult<T> = Result<T, ExprError>;

/// Errors that can occur during expression evaluation
#[derive(Debug, Clone, Error)]
pub enum ExprError {
    /// Malformed expression source
    #[error("expression syntax error: {0}")]
    Syntax(String),

    /// Strict mode referenced a name absent from the context
    #[error("undefined variable: {0}")]
    UndefinedVariable(String),

    /// Evaluation exceeded the configured timeout
    #[error("expression evaluation timed out after {0} ms")]
    Timeout(u64),

    /// Any other evaluation failure (bad operation, transform error, ...)
    #[error("expression evaluation failed: {0}")]
    Eval(String),
}

impl ExprError {
    /// Classify a minijinja error into the engine taxonomy
    pub(crate) fn from_minijinja(err: minijinja::Error) -> Self {
        let text = err.to_string();
        match err.kind() {
            minijinja::ErrorKind::SyntaxError => ExprError::Syntax(text),
            minijinja::ErrorKind::UndefinedError => ExprError::UndefinedVariable(text),
            // An undefined name used as an operand (`missing + 1`) surfaces
            // as an invalid operation on an undefined value, not as an
            // undefined error
            minijinja::ErrorKind::InvalidOperation if text.contains("undefined") => {
                ExprError::UndefinedVariable(text)
            }
            _ => ExprError::Eval(text),
        }
    }
}
