//! Condition tree types

use serde::{Deserialize, Serialize};

/// One node of a condition tree
///
/// The tree is explicit data, not native recursion: depth is bounded by the
/// document that produced it and walking it can never blow the stack into a
/// process crash.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConditionNode {
    /// Bare string sugar for an expression leaf
    Shorthand(String),

    /// All children must be true (AND, short-circuit; empty list is true)
    All { all: Vec<ConditionNode> },

    /// Any child must be true (OR, short-circuit; empty list is false)
    Any { any: Vec<ConditionNode> },

    /// Child must be false (NOT)
    Not { not: Box<ConditionNode> },

    /// Expression leaf, coerced with standard truthiness
    Expr { expr: String },
}

impl ConditionNode {
    /// Create an AND composite
    pub fn all(children: Vec<ConditionNode>) -> Self {
        ConditionNode::All { all: children }
    }

    /// Create an OR composite
    pub fn any(children: Vec<ConditionNode>) -> Self {
        ConditionNode::Any { any: children }
    }

    /// Create a NOT composite
    pub fn not(child: ConditionNode) -> Self {
        ConditionNode::Not {
            not: Box::new(child),
        }
    }

    /// Create an expression leaf
    pub fn expr(expr: impl Into<String>) -> Self {
        ConditionNode::Expr { expr: expr.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bare_string_is_leaf() {
        let node: ConditionNode = serde_json::from_str(r#""user.level > 3""#).unwrap();
        assert_eq!(node, ConditionNode::Shorthand("user.level > 3".into()));
    }

    #[test]
    fn test_all_deserialize() {
        let node: ConditionNode = serde_json::from_str(
            r#"{"all": ["a", {"expr": "b"}, {"not": "c"}]}"#,
        )
        .unwrap();

        if let ConditionNode::All { all } = node {
            assert_eq!(all.len(), 3);
            assert!(matches!(all[1], ConditionNode::Expr { .. }));
            assert!(matches!(all[2], ConditionNode::Not { .. }));
        } else {
            panic!("expected All node");
        }
    }

    #[test]
    fn test_nested_tree_deserialize() {
        let json = r#"{
            "any": [
                {"all": ["a", "b"]},
                {"not": {"any": ["c"]}}
            ]
        }"#;

        let node: ConditionNode = serde_json::from_str(json).unwrap();
        assert!(matches!(node, ConditionNode::Any { .. }));
    }

    #[test]
    fn test_helpers() {
        let c = ConditionNode::not(ConditionNode::all(vec![
            ConditionNode::expr("a"),
            ConditionNode::any(vec![]),
        ]));
        assert!(matches!(c, ConditionNode::Not { .. }));
    }
}
