//! Evaluation context
//!
//! Name → value bindings for one expression evaluation. The engine owns no
//! ambient state; everything an expression can see arrives through this
//! context.

use serde_json::Value;

/// Variables available to one expression evaluation
#[derive(Debug, Clone, Default)]
pub struct ExprContext {
    vars: serde_json::Map<String, Value>,
}

impl ExprContext {
    /// Create an empty context
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a context from a JSON object; non-objects yield an empty context
    pub fn from_value(value: Value) -> Self {
        match value {
            Value::Object(vars) => Self { vars },
            _ => Self::default(),
        }
    }

    /// Bind a variable
    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    /// Builder-style bind
    pub fn with(mut self, name: impl Into<String>, value: Value) -> Self {
        self.set(name, value);
        self
    }

    /// Look up a variable
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// All bindings as a JSON object
    pub fn as_object(&self) -> &serde_json::Map<String, Value> {
        &self.vars
    }

    /// Convert to a minijinja root value
    pub(crate) fn to_minijinja(&self) -> minijinja::Value {
        minijinja::Value::from_serialize(&self.vars)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_set_get() {
        let ctx = ExprContext::new().with("user", json!({"id": "u1"}));
        assert_eq!(ctx.get("user").unwrap()["id"], "u1");
        assert!(ctx.get("missing").is_none());
    }

    #[test]
    fn test_from_value_ignores_non_objects() {
        let ctx = ExprContext::from_value(json!([1, 2, 3]));
        assert!(ctx.as_object().is_empty());
    }
}
