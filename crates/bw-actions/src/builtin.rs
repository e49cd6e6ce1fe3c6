//! Builtin action handlers

use crate::handler::require_str;
use crate::{ActionError, ActionHandler, ActionRegistry, ActionResult, ExecutionContext};
use async_trait::async_trait;
use bw_bus::SharedTriggerBus;
use bw_core::{triggers, Scope, Trigger};
use bw_pipes::SharedPipeManager;
use bw_state::SharedStateBackend;
use serde_json::{json, Map, Value};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Install the builtin handler set
pub fn register_builtins(
    registry: &ActionRegistry,
    bus: SharedTriggerBus,
    state: SharedStateBackend,
    pipes: SharedPipeManager,
) {
    registry.register(Arc::new(Reply { bus: bus.clone() }));
    registry.register(Arc::new(Log));
    registry.register(Arc::new(Delay));
    registry.register(Arc::new(SetVar));
    registry.register(Arc::new(StateSet {
        state: state.clone(),
    }));
    registry.register(Arc::new(StateGet {
        state: state.clone(),
    }));
    registry.register(Arc::new(StateDelete { state }));
    registry.register(Arc::new(EmitEvent { bus }));
    registry.register(Arc::new(PipeSend { pipes }));
}

fn scope_from(config: &Map<String, Value>) -> Result<Scope, ActionError> {
    match config.get("scope").and_then(Value::as_str) {
        None => Ok(Scope::Global),
        Some(raw) => {
            Scope::from_str(raw).map_err(|err| ActionError::InvalidConfig(err.to_string()))
        }
    }
}

/// `reply`: record a reply and surface it as an outbound trigger
struct Reply {
    bus: SharedTriggerBus,
}

#[async_trait]
impl ActionHandler for Reply {
    fn name(&self) -> &str {
        "reply"
    }

    fn validate(&self, config: &Map<String, Value>) -> Result<(), String> {
        if config.contains_key("content") {
            Ok(())
        } else {
            Err("reply requires 'content'".to_string())
        }
    }

    async fn execute(
        &self,
        config: &Map<String, Value>,
        ctx: &mut ExecutionContext,
    ) -> ActionResult {
        let content = match config.get("content") {
            Some(Value::String(s)) => s.clone(),
            Some(other) => other.to_string(),
            None => return Err(ActionError::InvalidConfig("reply requires 'content'".into())),
        };
        ctx.push_reply(content.clone());
        self.bus.fire(Trigger::new(
            bw_core::TriggerKind::Event,
            triggers::ACTION_REPLY,
            json!({"content": content}),
            ctx.trigger.context.clone(),
        ));
        Ok(Some(json!({"content": content})))
    }
}

/// `log`: structured log line at a configured level
struct Log;

#[async_trait]
impl ActionHandler for Log {
    fn name(&self) -> &str {
        "log"
    }

    async fn execute(
        &self,
        config: &Map<String, Value>,
        ctx: &mut ExecutionContext,
    ) -> ActionResult {
        let message = require_str(config, "message", "log")?;
        let level = config
            .get("level")
            .and_then(Value::as_str)
            .unwrap_or("info");
        let origin = &ctx.trigger.name;
        match level {
            "debug" => debug!(origin = %origin, "{}", message),
            "warn" => warn!(origin = %origin, "{}", message),
            "error" => error!(origin = %origin, "{}", message),
            _ => info!(origin = %origin, "{}", message),
        }
        Ok(None)
    }
}

/// `delay`: pause the flow for a fixed duration
struct Delay;

#[async_trait]
impl ActionHandler for Delay {
    fn name(&self) -> &str {
        "delay"
    }

    fn validate(&self, config: &Map<String, Value>) -> Result<(), String> {
        match config.get("duration_ms").and_then(Value::as_u64) {
            Some(_) => Ok(()),
            None => Err("delay requires numeric 'duration_ms'".to_string()),
        }
    }

    async fn execute(
        &self,
        config: &Map<String, Value>,
        _ctx: &mut ExecutionContext,
    ) -> ActionResult {
        let ms = config
            .get("duration_ms")
            .and_then(Value::as_u64)
            .ok_or_else(|| {
                ActionError::InvalidConfig("delay requires numeric 'duration_ms'".into())
            })?;
        tokio::time::sleep(Duration::from_millis(ms)).await;
        Ok(None)
    }
}

/// `vars.set`: set an invocation-local variable
struct SetVar;

#[async_trait]
impl ActionHandler for SetVar {
    fn name(&self) -> &str {
        "vars.set"
    }

    async fn execute(
        &self,
        config: &Map<String, Value>,
        ctx: &mut ExecutionContext,
    ) -> ActionResult {
        let name = require_str(config, "name", "vars.set")?.to_string();
        let value = config.get("value").cloned().unwrap_or(Value::Null);
        ctx.set_var(name, value);
        Ok(None)
    }
}

/// `state.set`: write a scoped state variable, optionally with a TTL
struct StateSet {
    state: SharedStateBackend,
}

#[async_trait]
impl ActionHandler for StateSet {
    fn name(&self) -> &str {
        "state.set"
    }

    async fn execute(
        &self,
        config: &Map<String, Value>,
        ctx: &mut ExecutionContext,
    ) -> ActionResult {
        let name = require_str(config, "name", "state.set")?;
        let value = config.get("value").cloned().unwrap_or(Value::Null);
        let ttl = config
            .get("ttl_ms")
            .and_then(Value::as_u64)
            .map(Duration::from_millis);
        let key = ctx.scope_key(scope_from(config)?);
        self.state.set(&key, name, value, ttl)?;
        Ok(None)
    }
}

/// `state.get`: read a scoped state variable into a context variable
///
/// The destination defaults to the state variable's own name; `into`
/// overrides it. A missing variable reads as null.
struct StateGet {
    state: SharedStateBackend,
}

#[async_trait]
impl ActionHandler for StateGet {
    fn name(&self) -> &str {
        "state.get"
    }

    async fn execute(
        &self,
        config: &Map<String, Value>,
        ctx: &mut ExecutionContext,
    ) -> ActionResult {
        let name = require_str(config, "name", "state.get")?;
        let into = config
            .get("into")
            .and_then(Value::as_str)
            .unwrap_or(name)
            .to_string();
        let key = ctx.scope_key(scope_from(config)?);
        let value = self.state.get(&key, name)?.unwrap_or(Value::Null);
        ctx.set_var(into, value.clone());
        Ok(Some(value))
    }
}

/// `state.delete`: remove a scoped state variable
struct StateDelete {
    state: SharedStateBackend,
}

#[async_trait]
impl ActionHandler for StateDelete {
    fn name(&self) -> &str {
        "state.delete"
    }

    async fn execute(
        &self,
        config: &Map<String, Value>,
        ctx: &mut ExecutionContext,
    ) -> ActionResult {
        let name = require_str(config, "name", "state.delete")?;
        let key = ctx.scope_key(scope_from(config)?);
        let removed = self.state.delete(&key, name)?;
        Ok(Some(json!({"removed": removed})))
    }
}

/// `emit_event`: fire a named event back through the bus
struct EmitEvent {
    bus: SharedTriggerBus,
}

#[async_trait]
impl ActionHandler for EmitEvent {
    fn name(&self) -> &str {
        "emit_event"
    }

    fn validate(&self, config: &Map<String, Value>) -> Result<(), String> {
        match config.get("event").and_then(Value::as_str) {
            Some(_) => Ok(()),
            None => Err("emit_event requires 'event'".to_string()),
        }
    }

    async fn execute(
        &self,
        config: &Map<String, Value>,
        ctx: &mut ExecutionContext,
    ) -> ActionResult {
        let event = require_str(config, "event", "emit_event")?;
        let payload = config.get("payload").cloned().unwrap_or(json!({}));
        self.bus.fire(Trigger::new(
            bw_core::TriggerKind::Event,
            event,
            payload,
            ctx.trigger.context.child(),
        ));
        Ok(None)
    }
}

/// `pipe.send`: send a message on a named pipe
///
/// The pipe's response, when there is one, lands in the variable named by
/// `into`.
struct PipeSend {
    pipes: SharedPipeManager,
}

#[async_trait]
impl ActionHandler for PipeSend {
    fn name(&self) -> &str {
        "pipe.send"
    }

    fn validate(&self, config: &Map<String, Value>) -> Result<(), String> {
        match config.get("pipe").and_then(Value::as_str) {
            Some(_) => Ok(()),
            None => Err("pipe.send requires 'pipe'".to_string()),
        }
    }

    async fn execute(
        &self,
        config: &Map<String, Value>,
        ctx: &mut ExecutionContext,
    ) -> ActionResult {
        let pipe = require_str(config, "pipe", "pipe.send")?;
        let message = config.get("message").cloned().unwrap_or(Value::Null);
        let response = self.pipes.send(pipe, message).await?;
        if let (Some(into), Some(value)) =
            (config.get("into").and_then(Value::as_str), response.as_ref())
        {
            ctx.set_var(into.to_string(), value.clone());
        }
        Ok(response)
    }
}
