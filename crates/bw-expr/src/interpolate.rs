//! `${...}` template interpolation
//!
//! Tokens are scanned left to right with brace-depth tracking so expression
//! bodies containing `{`/`}` pairs (map literals) survive. Substitution is
//! the value's display form; null and undefined substitute as the empty
//! string, which makes interpolation idempotent on token-free templates.

use crate::context::ExprContext;
use crate::engine::ExprEngine;
use crate::error::{ExprError, ExprResult};
use serde_json::Value;

/// Whether a template contains any `${...}` token
pub fn has_tokens(template: &str) -> bool {
    template.contains("${")
}

/// If the template is exactly one `${...}` token, the token body
pub(crate) fn single_token(template: &str) -> Option<&str> {
    let body = template.strip_prefix("${")?;
    let end = find_close(body)?;
    if end + 1 == body.len() {
        Some(&body[..end])
    } else {
        None
    }
}

/// Index of the closing `}` matching an already-consumed `${`
fn find_close(body: &str) -> Option<usize> {
    let mut depth = 1usize;
    for (idx, ch) in body.char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(idx);
                }
            }
            _ => {}
        }
    }
    None
}

/// The string form a value takes when substituted into a template
pub fn display_value(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

pub(crate) fn interpolate(
    engine: &ExprEngine,
    template: &str,
    ctx: &ExprContext,
) -> ExprResult<String> {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let body = &rest[start + 2..];

        let end = find_close(body).ok_or_else(|| {
            ExprError::Syntax(format!("unterminated ${{...}} token in '{}'", template))
        })?;

        let value = engine.evaluate_sync(&body[..end], ctx)?;
        out.push_str(&display_value(&value));

        rest = &body[end + 1..];
    }

    out.push_str(rest);
    Ok(out)
}
