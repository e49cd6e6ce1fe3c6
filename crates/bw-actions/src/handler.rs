//! Action handler contract

use crate::{ActionError, ExecutionContext};
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Result type for action execution
pub type ActionResult = Result<Option<Value>, ActionError>;

/// One executable action
///
/// `config` arrives with `${...}` tokens already interpolated. `validate`
/// runs against the raw document config at load time, before any
/// interpolation.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    /// Registered name, e.g. "reply" or "state.set"
    fn name(&self) -> &str;

    /// Static config check; the default accepts anything
    fn validate(&self, _config: &Map<String, Value>) -> Result<(), String> {
        Ok(())
    }

    /// Run the action against the invocation's context
    async fn execute(
        &self,
        config: &Map<String, Value>,
        ctx: &mut ExecutionContext,
    ) -> ActionResult;
}

/// Fetch a required string field from an action config
pub(crate) fn require_str<'a>(
    config: &'a Map<String, Value>,
    field: &str,
    action: &str,
) -> Result<&'a str, ActionError> {
    config
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| {
            ActionError::InvalidConfig(format!("'{}' requires string field '{}'", action, field))
        })
}
