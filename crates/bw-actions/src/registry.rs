//! Action registry

use crate::{ActionError, ActionHandler, ActionResult, ExecutionContext};
use dashmap::DashMap;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::{debug, warn};

/// Registry of named action handlers
///
/// Registration is an atomic insert: a name resolves to exactly one handler
/// at any instant, and re-registering a name replaces the old handler with a
/// warning (last registration wins).
pub struct ActionRegistry {
    handlers: DashMap<String, Arc<dyn ActionHandler>>,
}

impl ActionRegistry {
    pub fn new() -> Self {
        Self {
            handlers: DashMap::new(),
        }
    }

    /// Install a handler under its own name
    pub fn register(&self, handler: Arc<dyn ActionHandler>) {
        let name = handler.name().to_string();
        debug!(action = %name, "Registering action");
        if self.handlers.insert(name.clone(), handler).is_some() {
            warn!(action = %name, "Replaced existing action registration");
        }
    }

    pub fn unregister(&self, name: &str) -> bool {
        self.handlers.remove(name).is_some()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Validate a step's raw config against its handler
    pub fn validate(&self, name: &str, config: &Map<String, Value>) -> Result<(), ActionError> {
        let handler = self.resolve(name)?;
        handler.validate(config).map_err(ActionError::InvalidConfig)
    }

    /// Resolve, validate and run one action
    pub async fn execute(
        &self,
        name: &str,
        config: &Map<String, Value>,
        ctx: &mut ExecutionContext,
    ) -> ActionResult {
        let handler = self.resolve(name)?;
        handler.validate(config).map_err(ActionError::InvalidConfig)?;
        debug!(action = %name, "Executing action");
        handler.execute(config, ctx).await
    }

    fn resolve(&self, name: &str) -> Result<Arc<dyn ActionHandler>, ActionError> {
        // Clone out of the guard so the handler runs without holding the map
        self.handlers
            .get(name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ActionError::NotFound(name.to_string()))
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<_> = self
            .handlers
            .iter()
            .map(|entry| entry.key().clone())
            .collect();
        names.sort();
        names
    }
}

impl Default for ActionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Thread-safe wrapper for ActionRegistry
pub type SharedActionRegistry = Arc<ActionRegistry>;
