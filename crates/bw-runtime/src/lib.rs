//! Runtime wiring
//!
//! Owns every subsystem as an explicit instance: the trigger bus, the state
//! backend, the pipe manager, the action registry with its builtins, and the
//! dispatcher. No globals; construct one Runtime per loaded specification.
//! `start` connects the pipes and runs the dispatch loop off the bus until
//! `shutdown` cancels it.

use bw_actions::{register_builtins, ActionRegistry, ExecutionContext, SharedActionRegistry};
use bw_bus::{SharedTriggerBus, TriggerBus};
use bw_core::{ActionOutcome, Context, Trigger};
use bw_engine::{Dispatcher, EngineError, FlowExecutor, FlowOutcome, SharedDispatcher};
use bw_expr::ExprEngineBuilder;
use bw_pipes::{PipeManager, SharedPipeManager};
use bw_spec::{SpecError, Specification};
use bw_state::{SharedStateBackend, StateStore};
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Errors from runtime construction and invocation
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error(transparent)]
    Spec(#[from] SpecError),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

pub type RuntimeResult<T> = Result<T, RuntimeError>;

/// Tunables for the engine instances the runtime constructs
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    /// Maximum flow call depth
    pub max_call_depth: usize,
    /// Expression evaluation timeout in milliseconds
    pub expr_timeout_ms: u64,
    /// Treat undefined expression variables as errors
    pub strict_expressions: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            max_call_depth: bw_engine::DEFAULT_MAX_DEPTH,
            expr_timeout_ms: 5000,
            strict_expressions: false,
        }
    }
}

/// A fully wired engine for one specification
pub struct Runtime {
    bus: SharedTriggerBus,
    state: SharedStateBackend,
    pipes: SharedPipeManager,
    registry: SharedActionRegistry,
    dispatcher: SharedDispatcher,
    cancel: CancellationToken,
}

impl Runtime {
    /// Wire a runtime around an already loaded specification
    pub fn new(spec: Specification) -> Self {
        Self::with_config(spec, RuntimeConfig::default())
    }

    pub fn with_config(spec: Specification, config: RuntimeConfig) -> Self {
        let spec = Arc::new(spec);

        let bus: SharedTriggerBus = Arc::new(TriggerBus::new());
        let state: SharedStateBackend = Arc::new(StateStore::new());
        let pipes: SharedPipeManager = Arc::new(PipeManager::from_defs(&spec.pipes, bus.clone()));

        let registry: SharedActionRegistry = Arc::new(ActionRegistry::new());
        register_builtins(&registry, bus.clone(), state.clone(), pipes.clone());

        let expr = ExprEngineBuilder::new()
            .timeout(Duration::from_millis(config.expr_timeout_ms))
            .strict(config.strict_expressions)
            .build();
        let executor = FlowExecutor::new(spec.clone(), registry.clone(), expr)
            .with_max_depth(config.max_call_depth);

        let cancel = CancellationToken::new();
        let dispatcher = Arc::new(Dispatcher::new(spec, executor, cancel.child_token()));

        Self {
            bus,
            state,
            pipes,
            registry,
            dispatcher,
            cancel,
        }
    }

    /// Load a JSON specification and wire a runtime around it
    pub fn from_json(input: &str) -> RuntimeResult<Self> {
        Ok(Self::new(Specification::from_json_str(input)?))
    }

    /// Load a YAML specification and wire a runtime around it
    pub fn from_yaml(input: &str) -> RuntimeResult<Self> {
        Ok(Self::new(Specification::from_yaml_str(input)?))
    }

    pub fn bus(&self) -> &SharedTriggerBus {
        &self.bus
    }

    pub fn state(&self) -> &SharedStateBackend {
        &self.state
    }

    pub fn pipes(&self) -> &SharedPipeManager {
        &self.pipes
    }

    pub fn registry(&self) -> &SharedActionRegistry {
        &self.registry
    }

    pub fn dispatcher(&self) -> &SharedDispatcher {
        &self.dispatcher
    }

    /// Connect every configured pipe and start the dispatch loop
    ///
    /// The loop subscribes to all triggers on the bus and dispatches each
    /// one as its own task. Returns the loop's join handle; the loop runs
    /// until `shutdown`.
    pub async fn start(&self) -> JoinHandle<()> {
        self.pipes.connect_all().await;

        let mut rx = self.bus.subscribe_all();
        let dispatcher = self.dispatcher.clone();
        let cancel = self.cancel.clone();

        info!(pipes = self.pipes.len(), "Runtime started");
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        debug!("Dispatch loop stopping");
                        break;
                    }
                    received = rx.recv() => match received {
                        Ok(trigger) => {
                            let dispatcher = dispatcher.clone();
                            tokio::spawn(async move {
                                dispatcher.dispatch(trigger).await;
                            });
                        }
                        Err(RecvError::Lagged(missed)) => {
                            warn!(missed, "Dispatch loop lagged, triggers dropped");
                        }
                        Err(RecvError::Closed) => break,
                    },
                }
            }
        })
    }

    /// Fire a trigger onto the bus for the dispatch loop to pick up
    pub fn fire(&self, trigger: Trigger) {
        self.bus.fire(trigger);
    }

    /// Invoke a command directly and collect its outcomes
    pub async fn invoke_command(
        &self,
        name: &str,
        options: Map<String, Value>,
        context: Context,
    ) -> RuntimeResult<Vec<ActionOutcome>> {
        Ok(self.dispatcher.invoke_command(name, options, context).await?)
    }

    /// Call a named flow directly
    pub async fn call_flow(
        &self,
        name: &str,
        args: &Map<String, Value>,
        ctx: &mut ExecutionContext,
    ) -> RuntimeResult<FlowOutcome> {
        Ok(self.dispatcher.call_flow(name, args, ctx).await?)
    }

    /// Stop the dispatch loop and disconnect every pipe
    pub async fn shutdown(&self) {
        info!("Runtime shutting down");
        self.cancel.cancel();
        self.pipes.disconnect_all().await;
    }
}

/// Install the global tracing subscriber
///
/// Filter comes from `RUST_LOG`, defaulting to `info`. Safe to call more
/// than once; later calls are no-ops.
pub fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).try_init();
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_wires_builtins() {
        let runtime = Runtime::new(Specification::default());
        assert!(runtime.registry().contains("reply"));
        assert!(runtime.registry().contains("state.set"));
        assert!(runtime.pipes().is_empty());
    }

    #[tokio::test]
    async fn test_from_json_rejects_duplicates() {
        let doc = r#"{
            "commands": [
                {"name": "ping", "actions": []},
                {"name": "ping", "actions": []}
            ]
        }"#;
        assert!(matches!(
            Runtime::from_json(doc),
            Err(RuntimeError::Spec(SpecError::Duplicate { .. }))
        ));
    }

    #[tokio::test]
    async fn test_fire_reaches_dispatch_loop() {
        let runtime = Runtime::from_json(
            r#"{
                "commands": [
                    {"name": "ping", "actions": [{"action": "reply", "content": "Pong!"}]}
                ]
            }"#,
        )
        .unwrap();
        let handle = runtime.start().await;

        // Replies come back over the bus as action.reply triggers
        let mut replies = runtime.bus().subscribe(bw_core::triggers::ACTION_REPLY);
        runtime.fire(Trigger::command("ping", json!({}), Context::with_user("u1")));

        let reply = tokio::time::timeout(Duration::from_secs(1), replies.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reply.payload["content"], "Pong!");

        runtime.shutdown().await;
        let _ = handle.await;
    }
}
