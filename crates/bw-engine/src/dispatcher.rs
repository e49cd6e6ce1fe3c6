//! Trigger dispatcher
//!
//! Resolves an inbound trigger to its handlers, gates each through its
//! condition and timing policy, and invokes the executor with a fresh
//! execution context. Handlers for the same event run as independent tasks
//! in declaration order; one failing handler never blocks another.

use crate::executor::{FlowExecutor, FlowOutcome};
use crate::timing::{Debouncer, OnceSet, WindowGate};
use crate::{EngineError, EngineResult};
use bw_actions::ExecutionContext;
use bw_condition::{ConditionEvaluator, ConditionNode};
use bw_core::{ActionOutcome, Context, Trigger, TriggerKind};
use bw_expr::ExprContext;
use bw_spec::{EventHandlerDef, KeyDimension, Specification};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Shared handle to a dispatcher
pub type SharedDispatcher = Arc<Dispatcher>;

struct DispatcherInner {
    spec: Arc<Specification>,
    executor: FlowExecutor,
    conditions: ConditionEvaluator,
    cooldowns: WindowGate,
    throttles: WindowGate,
    debouncer: Debouncer,
    once: OnceSet,
    cancel: CancellationToken,
}

/// Routes triggers to gated handler executions
///
/// Cheap to clone; all clones share the gate state.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Arc<DispatcherInner>,
}

impl Dispatcher {
    pub fn new(
        spec: Arc<Specification>,
        executor: FlowExecutor,
        cancel: CancellationToken,
    ) -> Self {
        let conditions = ConditionEvaluator::new(executor.expr().clone());
        Self {
            inner: Arc::new(DispatcherInner {
                spec,
                executor,
                conditions,
                cooldowns: WindowGate::new(),
                throttles: WindowGate::new(),
                debouncer: Debouncer::new(),
                once: OnceSet::new(),
                cancel,
            }),
        }
    }

    pub fn spec(&self) -> &Specification {
        &self.inner.spec
    }

    /// Route a trigger by kind
    pub async fn dispatch(&self, trigger: Trigger) {
        match trigger.kind {
            TriggerKind::Command => {
                let options = trigger
                    .payload
                    .as_object()
                    .cloned()
                    .unwrap_or_default();
                let name = trigger.name.clone();
                match self.invoke_command(&name, options, trigger.context).await {
                    Ok(outcomes) => {
                        debug!(command = %name, outcomes = outcomes.len(), "Command dispatched")
                    }
                    Err(err) => warn!(command = %name, error = %err, "Command dispatch failed"),
                }
            }
            TriggerKind::Event | TriggerKind::Schedule => self.dispatch_event(trigger),
            TriggerKind::PipeMessage => self.dispatch_pipe_message(trigger).await,
        }
    }

    /// Invoke a command by name and collect its outcomes
    ///
    /// Gate order: condition, then cooldown. A cooldown hit runs the
    /// configured cooldown actions instead of the command body and does
    /// not refresh the window.
    pub async fn invoke_command(
        &self,
        name: &str,
        options: Map<String, Value>,
        context: Context,
    ) -> EngineResult<Vec<ActionOutcome>> {
        self.inner.invoke_command(name, options, context).await
    }

    /// Dispatch an event (or schedule) trigger to every matching handler
    ///
    /// Handlers spawn in declaration order and run independently.
    pub fn dispatch_event(&self, trigger: Trigger) {
        let handlers: Vec<EventHandlerDef> = self
            .inner
            .spec
            .handlers_for(&trigger.name)
            .cloned()
            .collect();
        if handlers.is_empty() {
            debug!(event = %trigger.name, "No handlers for event");
            return;
        }

        for def in handlers {
            let inner = self.inner.clone();
            let trigger = trigger.clone();
            tokio::spawn(async move {
                inner.run_event_handler(def, trigger).await;
            });
        }
    }

    /// Dispatch an inbound pipe message to the pipe's handler actions
    pub async fn dispatch_pipe_message(&self, trigger: Trigger) {
        self.inner.dispatch_pipe_message(trigger).await
    }

    /// Call a named flow directly
    pub async fn call_flow(
        &self,
        name: &str,
        args: &Map<String, Value>,
        ctx: &mut ExecutionContext,
    ) -> EngineResult<FlowOutcome> {
        self.inner
            .executor
            .call_flow(name, args, ctx, &self.inner.cancel)
            .await
    }
}

impl DispatcherInner {
    async fn invoke_command(
        &self,
        name: &str,
        options: Map<String, Value>,
        context: Context,
    ) -> EngineResult<Vec<ActionOutcome>> {
        let def = self
            .spec
            .command(name)
            .ok_or_else(|| EngineError::CommandNotFound(name.to_string()))?
            .clone();

        let trigger = Trigger::command(name, Value::Object(options), context);
        let mut ctx = ExecutionContext::new(trigger);

        if !self
            .passes_condition(def.condition.as_ref(), def.lenient_condition, &ctx)
            .await?
        {
            debug!(command = %name, "Command condition not met");
            return Ok(Vec::new());
        }

        if let Some(cooldown) = &def.cooldown {
            let key = cooldown_key(name, cooldown.per, &ctx.trigger.context);
            let window = Duration::from_millis(cooldown.duration_ms);
            if !self.cooldowns.check(&key, window) {
                debug!(command = %name, key = %key, "Command on cooldown");
                let outcome = self
                    .executor
                    .run(&cooldown.on_cooldown, &mut ctx, &self.cancel)
                    .await;
                return Ok(outcome.outcomes);
            }
        }

        let outcome = self.executor.run(&def.actions, &mut ctx, &self.cancel).await;
        Ok(outcome.outcomes)
    }

    async fn dispatch_pipe_message(&self, trigger: Trigger) {
        let Some(def) = self.spec.pipe(&trigger.name) else {
            debug!(pipe = %trigger.name, "Message from unconfigured pipe");
            return;
        };
        let actions = def.on_message.clone();
        let pipe = trigger.name.clone();

        let mut ctx = ExecutionContext::new(trigger);
        let outcome = self.executor.run(&actions, &mut ctx, &self.cancel).await;
        if !outcome.success() {
            warn!(pipe = %pipe, "Pipe message handler finished with failures");
        }
    }

    async fn run_event_handler(&self, def: EventHandlerDef, trigger: Trigger) {
        let mut ctx = ExecutionContext::new(trigger);

        match self
            .passes_condition(def.condition.as_ref(), def.lenient_condition, &ctx)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                debug!(handler = %def.id, "Handler condition not met");
                return;
            }
            Err(err) => {
                warn!(handler = %def.id, error = %err, "Handler condition failed");
                return;
            }
        }

        if def.once && !self.once.mark(&def.id) {
            debug!(handler = %def.id, "Once handler already fired");
            return;
        }

        if let Some(throttle) = &def.throttle {
            let key = self.fingerprint(&def.id, &throttle.key, &ctx);
            if !self
                .throttles
                .check(&key, Duration::from_millis(throttle.window_ms))
            {
                debug!(handler = %def.id, key = %key, "Handler throttled");
                return;
            }
        }

        if let Some(debounce) = &def.debounce {
            let key = self.fingerprint(&def.id, &debounce.key, &ctx);
            let quiet = Duration::from_millis(debounce.quiet_ms);
            let payload = ctx.trigger.payload.clone();
            let Some(latest) = self.debouncer.settle(&key, payload, quiet).await else {
                return;
            };
            // A newer event may have arrived during the quiet period; the
            // surviving call executes with the latest payload
            let mut trigger = ctx.trigger.clone();
            trigger.payload = latest;
            ctx = ExecutionContext::new(trigger);
        }

        let outcome = self.executor.run(&def.actions, &mut ctx, &self.cancel).await;
        if !outcome.success() {
            warn!(handler = %def.id, "Handler finished with failures");
        }
    }

    async fn passes_condition(
        &self,
        node: Option<&ConditionNode>,
        lenient: bool,
        ctx: &ExecutionContext,
    ) -> EngineResult<bool> {
        let Some(node) = node else {
            return Ok(true);
        };
        let scope = ExprContext::from_value(Value::Object(ctx.vars().clone()));
        if lenient {
            Ok(self.conditions.evaluate_lenient(node, &scope).await)
        } else {
            Ok(self.conditions.evaluate(node, &scope).await?)
        }
    }

    /// Build a gate key from a handler id plus its configured key expressions
    fn fingerprint(&self, base: &str, keys: &[String], ctx: &ExecutionContext) -> String {
        let mut key = base.to_string();
        if keys.is_empty() {
            return key;
        }
        let scope = ExprContext::from_value(Value::Object(ctx.vars().clone()));
        for expr in keys {
            let part = match self.executor.expr().evaluate_sync(expr, &scope) {
                Ok(Value::String(s)) => s,
                Ok(Value::Null) => String::new(),
                Ok(value) => value.to_string(),
                Err(err) => {
                    warn!(expr = %expr, error = %err, "Gate key expression failed");
                    String::new()
                }
            };
            key.push(':');
            key.push_str(&part);
        }
        key
    }
}

fn cooldown_key(name: &str, per: KeyDimension, context: &Context) -> String {
    let id = match per {
        KeyDimension::User => context.user_id.as_deref(),
        KeyDimension::Channel => context.channel_id.as_deref(),
        KeyDimension::Guild => context.guild_id.as_deref(),
    };
    format!("{}:{}:{}", name, per.as_str(), id.unwrap_or(""))
}
