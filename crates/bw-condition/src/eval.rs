//! Condition evaluation logic

use crate::node::ConditionNode;
use crate::{ConditionError, ConditionResult};
use bw_expr::{ExprContext, ExprEngine};
use serde_json::Value;
use std::future::Future;
use std::pin::Pin;
use tracing::{trace, warn};

/// Standard truthiness coercion for expression leaves
///
/// false, 0, 0.0, "", null and undefined coerce to false; everything else,
/// including empty collections, is true.
pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i != 0
            } else if let Some(u) = n.as_u64() {
                u != 0
            } else {
                n.as_f64().map(|f| f != 0.0).unwrap_or(true)
            }
        }
        Value::String(s) => !s.is_empty(),
        Value::Array(_) | Value::Object(_) => true,
    }
}

/// Rewrite `${...}` tokens in a condition string to parenthesized
/// subexpressions, so documents may gate with either bare expressions or
/// the template form. Brace-depth aware for nested `{}` inside a token.
fn normalize(expr: &str) -> String {
    if !expr.contains("${") {
        return expr.to_string();
    }

    let mut out = String::with_capacity(expr.len());
    let mut chars = expr.chars().peekable();
    let mut depth: Vec<u32> = Vec::new();

    while let Some(c) = chars.next() {
        if c == '$' && chars.peek() == Some(&'{') {
            chars.next();
            out.push('(');
            depth.push(0);
        } else if c == '{' {
            if let Some(d) = depth.last_mut() {
                *d += 1;
            }
            out.push('{');
        } else if c == '}' {
            match depth.last_mut() {
                Some(0) => {
                    depth.pop();
                    out.push(')');
                }
                Some(d) => {
                    *d -= 1;
                    out.push('}');
                }
                None => out.push('}'),
            }
        } else {
            out.push(c);
        }
    }
    out
}

/// Condition evaluator
///
/// Walks a condition tree, delegating leaves to the expression engine and
/// short-circuiting composites. Leaf failures propagate as typed errors;
/// `evaluate_lenient` is the opt-in for optional gates that prefer a logged
/// false over a failure.
pub struct ConditionEvaluator {
    engine: ExprEngine,
}

impl ConditionEvaluator {
    /// Create a new condition evaluator over an expression engine
    pub fn new(engine: ExprEngine) -> Self {
        Self { engine }
    }

    /// Evaluate a condition tree
    pub fn evaluate<'a>(
        &'a self,
        node: &'a ConditionNode,
        ctx: &'a ExprContext,
    ) -> Pin<Box<dyn Future<Output = ConditionResult<bool>> + Send + 'a>> {
        Box::pin(async move {
            match node {
                ConditionNode::Shorthand(expr) | ConditionNode::Expr { expr } => {
                    let expr = normalize(expr);
                    let value = self.engine.evaluate(&expr, ctx).await?;
                    let result = truthy(&value);
                    trace!(expr = %expr, result, "Condition leaf evaluated");
                    Ok(result)
                }
                ConditionNode::All { all } => {
                    for child in all {
                        if !self.evaluate(child, ctx).await? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
                ConditionNode::Any { any } => {
                    for child in any {
                        if self.evaluate(child, ctx).await? {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }
                ConditionNode::Not { not } => Ok(!self.evaluate(not, ctx).await?),
            }
        })
    }

    /// Lenient evaluation: a failing leaf is logged and treated as false
    pub async fn evaluate_lenient(&self, node: &ConditionNode, ctx: &ExprContext) -> bool {
        match self.evaluate(node, ctx).await {
            Ok(result) => result,
            Err(ConditionError::Expr(err)) => {
                warn!(error = %err, "Condition failed, treating as false (lenient)");
                false
            }
        }
    }
}
