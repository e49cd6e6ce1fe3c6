//! Top-level specification document and its definition types

use crate::pipe::PipeDef;
use crate::timing::{CooldownConfig, DebounceConfig, ThrottleConfig};
use crate::{SpecError, SpecResult};
use bw_condition::ConditionNode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;

/// One step of a command, handler or flow
///
/// `action` names a registered handler; everything else in the object is the
/// step's configuration and is passed through opaquely (interpolation happens
/// at execution time, not load time).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionDef {
    /// Registered action name, e.g. "reply" or "state.set"
    pub action: String,

    /// Remaining keys of the step object, uninterpreted at this layer
    #[serde(flatten)]
    pub config: serde_json::Map<String, Value>,
}

impl ActionDef {
    /// Create a bare step with no configuration
    pub fn new(action: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            config: serde_json::Map::new(),
        }
    }

    /// Add a configuration entry
    pub fn with(mut self, key: impl Into<String>, value: Value) -> Self {
        self.config.insert(key.into(), value);
        self
    }

    /// Look up a configuration entry
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.config.get(key)
    }
}

/// A user-invocable command
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandDef {
    /// Command name, unique within the document
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Gate checked before the body runs
    #[serde(default)]
    pub condition: Option<ConditionNode>,

    /// Treat a failing condition as false instead of an error
    #[serde(default)]
    pub lenient_condition: bool,

    #[serde(default)]
    pub cooldown: Option<CooldownConfig>,

    pub actions: Vec<ActionDef>,
}

/// A handler bound to a named event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventHandlerDef {
    /// Handler id, unique within the document
    pub id: String,

    /// Event name the handler listens for
    pub event: String,

    #[serde(default)]
    pub condition: Option<ConditionNode>,

    #[serde(default)]
    pub lenient_condition: bool,

    #[serde(default)]
    pub debounce: Option<DebounceConfig>,

    #[serde(default)]
    pub throttle: Option<ThrottleConfig>,

    /// Run at most once for the process lifetime
    #[serde(default)]
    pub once: bool,

    pub actions: Vec<ActionDef>,
}

/// A named, callable action sequence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowDef {
    /// Flow name, unique within the document
    pub name: String,

    /// Declared parameter names, bound from call arguments
    #[serde(default)]
    pub params: Vec<String>,

    pub actions: Vec<ActionDef>,
}

/// The full declarative document for one bot
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Specification {
    #[serde(default)]
    pub name: Option<String>,

    #[serde(default)]
    pub commands: Vec<CommandDef>,

    #[serde(default)]
    pub events: Vec<EventHandlerDef>,

    #[serde(default)]
    pub flows: Vec<FlowDef>,

    #[serde(default)]
    pub pipes: Vec<PipeDef>,
}

impl Specification {
    /// Load from a JSON string
    pub fn from_json_str(input: &str) -> SpecResult<Self> {
        let spec: Specification = serde_json::from_str(input)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Load from a YAML string
    pub fn from_yaml_str(input: &str) -> SpecResult<Self> {
        let spec: Specification = serde_yaml::from_str(input)?;
        spec.validate()?;
        Ok(spec)
    }

    /// Check name uniqueness within each namespace
    pub fn validate(&self) -> SpecResult<()> {
        check_unique("command", self.commands.iter().map(|c| c.name.as_str()))?;
        check_unique("event handler", self.events.iter().map(|e| e.id.as_str()))?;
        check_unique("flow", self.flows.iter().map(|f| f.name.as_str()))?;
        check_unique("pipe", self.pipes.iter().map(|p| p.name.as_str()))?;
        Ok(())
    }

    /// Look up a command by name
    pub fn command(&self, name: &str) -> Option<&CommandDef> {
        self.commands.iter().find(|c| c.name == name)
    }

    /// Look up a flow by name
    pub fn flow(&self, name: &str) -> Option<&FlowDef> {
        self.flows.iter().find(|f| f.name == name)
    }

    /// Look up a pipe by name
    pub fn pipe(&self, name: &str) -> Option<&PipeDef> {
        self.pipes.iter().find(|p| p.name == name)
    }

    /// All handlers for an event, in declaration order
    pub fn handlers_for<'a>(
        &'a self,
        event: &'a str,
    ) -> impl Iterator<Item = &'a EventHandlerDef> + 'a {
        self.events.iter().filter(move |h| h.event == event)
    }
}

fn check_unique<'a>(
    kind: &'static str,
    names: impl Iterator<Item = &'a str>,
) -> SpecResult<()> {
    let mut seen = HashSet::new();
    for name in names {
        if !seen.insert(name) {
            return Err(SpecError::Duplicate {
                kind,
                name: name.to_string(),
            });
        }
    }
    Ok(())
}
