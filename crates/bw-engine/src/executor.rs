//! Flow executor

use crate::{EngineError, EngineResult, DEFAULT_MAX_DEPTH};
use bw_actions::{ExecutionContext, SharedActionRegistry};
use bw_core::ActionOutcome;
use bw_expr::{ExprContext, ExprEngine};
use bw_spec::{ActionDef, Specification};
use serde_json::{json, Map, Value};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// One entry of the explicit call stack
#[derive(Debug, Clone)]
pub struct Frame {
    /// Command, handler id, pipe name, or flow name this frame runs for
    pub flow: String,
    /// Nesting depth; the root invocation is 0
    pub depth: usize,
}

/// How an action sequence ended
#[derive(Debug, Clone, PartialEq)]
pub enum FlowControl {
    /// Every action was attempted
    Completed,
    /// A `return` step ended the frame early
    Returned(Option<Value>),
    /// An `abort` step or cancellation ended the whole invocation
    Aborted(String),
}

/// Result of running one action sequence
#[derive(Debug, Clone)]
pub struct FlowOutcome {
    pub outcomes: Vec<ActionOutcome>,
    pub control: FlowControl,
}

impl FlowOutcome {
    /// True when nothing failed and the frame was not aborted
    pub fn success(&self) -> bool {
        !matches!(self.control, FlowControl::Aborted(_))
            && self.outcomes.iter().all(|o| o.success)
    }

    /// Value produced by a `return` step, if any
    pub fn returned(&self) -> Option<&Value> {
        match &self.control {
            FlowControl::Returned(value) => value.as_ref(),
            _ => None,
        }
    }
}

/// Runs ordered action lists with an explicit frame stack
///
/// Control steps (`return`, `abort`, `call_flow`) are interpreted here;
/// everything else resolves through the action registry. Failures become
/// failed outcomes in the sequence rather than early exits. The exceptions
/// are `abort`, which ends the whole invocation, and cancellation, which is
/// honored between actions.
pub struct FlowExecutor {
    spec: Arc<Specification>,
    registry: SharedActionRegistry,
    expr: ExprEngine,
    max_depth: usize,
}

impl FlowExecutor {
    pub fn new(spec: Arc<Specification>, registry: SharedActionRegistry, expr: ExprEngine) -> Self {
        Self {
            spec,
            registry,
            expr,
            max_depth: DEFAULT_MAX_DEPTH,
        }
    }

    /// Override the maximum call-stack depth
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    pub fn expr(&self) -> &ExprEngine {
        &self.expr
    }

    /// Run a root action sequence (command body, event handler, pipe handler)
    pub async fn run(
        &self,
        actions: &[ActionDef],
        ctx: &mut ExecutionContext,
        cancel: &CancellationToken,
    ) -> FlowOutcome {
        let frame = Frame {
            flow: ctx.trigger.name.clone(),
            depth: 0,
        };
        self.run_frame(actions, ctx, cancel, frame).await
    }

    /// Call a named flow directly, as the engine's public entry point
    pub async fn call_flow(
        &self,
        name: &str,
        args: &Map<String, Value>,
        ctx: &mut ExecutionContext,
        cancel: &CancellationToken,
    ) -> EngineResult<FlowOutcome> {
        let flow = self
            .spec
            .flow(name)
            .ok_or_else(|| EngineError::FlowNotFound(name.to_string()))?;

        let mut child_ctx = ctx.child(bind_params(&flow.params, Some(args)));
        let frame = Frame {
            flow: name.to_string(),
            depth: 1,
        };
        let outcome = self
            .run_frame(&flow.actions, &mut child_ctx, cancel, frame)
            .await;
        ctx.absorb_replies(&child_ctx);
        Ok(outcome)
    }

    fn run_frame<'a>(
        &'a self,
        actions: &'a [ActionDef],
        ctx: &'a mut ExecutionContext,
        cancel: &'a CancellationToken,
        frame: Frame,
    ) -> Pin<Box<dyn Future<Output = FlowOutcome> + Send + 'a>> {
        Box::pin(async move {
            let mut outcomes = Vec::new();

            for step in actions {
                // Cooperative cancellation, checked only at action boundaries
                if cancel.is_cancelled() {
                    debug!(frame = %frame.flow, "Invocation cancelled");
                    return FlowOutcome {
                        outcomes,
                        control: FlowControl::Aborted("cancelled".to_string()),
                    };
                }

                let scope = ExprContext::from_value(Value::Object(ctx.vars().clone()));
                let config =
                    match self.expr.render_value(&Value::Object(step.config.clone()), &scope) {
                        Ok(Value::Object(map)) => map,
                        Ok(_) => Map::new(),
                        Err(err) => {
                            warn!(
                                frame = %frame.flow, action = %step.action, error = %err,
                                "Config interpolation failed"
                            );
                            outcomes.push(ActionOutcome::err(err.to_string()));
                            continue;
                        }
                    };

                match step.action.as_str() {
                    "return" => {
                        return FlowOutcome {
                            outcomes,
                            control: FlowControl::Returned(config.get("value").cloned()),
                        };
                    }
                    "abort" => {
                        let reason = config
                            .get("reason")
                            .and_then(Value::as_str)
                            .unwrap_or("aborted")
                            .to_string();
                        debug!(frame = %frame.flow, reason = %reason, "Invocation aborted");
                        return FlowOutcome {
                            outcomes,
                            control: FlowControl::Aborted(reason),
                        };
                    }
                    "call_flow" => {
                        match self.step_call_flow(&config, ctx, cancel, &frame).await {
                            StepCall::Done(outcome) => outcomes.push(outcome),
                            StepCall::Aborted(reason) => {
                                return FlowOutcome {
                                    outcomes,
                                    control: FlowControl::Aborted(reason),
                                };
                            }
                        }
                    }
                    name => {
                        match self.registry.execute(name, &config, ctx).await {
                            Ok(Some(data)) => outcomes.push(ActionOutcome::ok_with(data)),
                            Ok(None) => outcomes.push(ActionOutcome::ok()),
                            Err(err) => {
                                warn!(
                                    frame = %frame.flow, action = %name, error = %err,
                                    "Action failed"
                                );
                                outcomes.push(ActionOutcome::err(err.to_string()));
                            }
                        }
                    }
                }
            }

            FlowOutcome {
                outcomes,
                control: FlowControl::Completed,
            }
        })
    }

    async fn step_call_flow(
        &self,
        config: &Map<String, Value>,
        ctx: &mut ExecutionContext,
        cancel: &CancellationToken,
        frame: &Frame,
    ) -> StepCall {
        let Some(name) = config.get("flow").and_then(Value::as_str) else {
            return StepCall::Done(ActionOutcome::err("call_flow requires 'flow'"));
        };

        let depth = frame.depth + 1;
        if depth > self.max_depth {
            let err = EngineError::RecursionLimitExceeded {
                depth,
                max: self.max_depth,
            };
            warn!(frame = %frame.flow, flow = %name, "{}", err);
            // Fails this one call only; the caller's frame keeps running
            return StepCall::Done(ActionOutcome::err(err.to_string()));
        }

        let Some(flow) = self.spec.flow(name) else {
            let err = EngineError::FlowNotFound(name.to_string());
            return StepCall::Done(ActionOutcome::err(err.to_string()));
        };

        let args = config.get("args").and_then(Value::as_object);
        let mut child_ctx = ctx.child(bind_params(&flow.params, args));
        let child_frame = Frame {
            flow: name.to_string(),
            depth,
        };
        let child = self
            .run_frame(&flow.actions, &mut child_ctx, cancel, child_frame)
            .await;
        ctx.absorb_replies(&child_ctx);

        match child.control {
            FlowControl::Aborted(reason) => StepCall::Aborted(reason),
            FlowControl::Returned(value) => StepCall::Done(ActionOutcome::ok_with(
                json!({"flow": name, "returned": value}),
            )),
            FlowControl::Completed => StepCall::Done(ActionOutcome::ok_with(
                json!({"flow": name, "returned": Value::Null}),
            )),
        }
    }
}

enum StepCall {
    Done(ActionOutcome),
    Aborted(String),
}

/// Bind declared parameter names from a call's args; missing args are null
fn bind_params(params: &[String], args: Option<&Map<String, Value>>) -> Map<String, Value> {
    let mut bound = Map::new();
    for param in params {
        let value = args
            .and_then(|map| map.get(param))
            .cloned()
            .unwrap_or(Value::Null);
        bound.insert(param.clone(), value);
    }
    bound
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use bw_actions::{ActionHandler, ActionRegistry, ActionResult};
    use bw_core::Trigger;
    use bw_spec::Specification;

    /// Appends its "tag" config to the shared `seen` variable
    struct Record;

    #[async_trait]
    impl ActionHandler for Record {
        fn name(&self) -> &str {
            "record"
        }

        async fn execute(
            &self,
            config: &Map<String, Value>,
            ctx: &mut ExecutionContext,
        ) -> ActionResult {
            let tag = config.get("tag").cloned().unwrap_or(Value::Null);
            let mut seen = ctx
                .var("seen")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            seen.push(tag);
            ctx.set_var("seen", Value::Array(seen));
            Ok(None)
        }
    }

    struct Fail;

    #[async_trait]
    impl ActionHandler for Fail {
        fn name(&self) -> &str {
            "fail"
        }

        async fn execute(
            &self,
            _config: &Map<String, Value>,
            _ctx: &mut ExecutionContext,
        ) -> ActionResult {
            Err(bw_actions::ActionError::Failed("intentional".to_string()))
        }
    }

    fn executor(spec: Specification) -> FlowExecutor {
        let registry = Arc::new(ActionRegistry::new());
        registry.register(Arc::new(Record));
        registry.register(Arc::new(Fail));
        FlowExecutor::new(Arc::new(spec), registry, ExprEngine::new())
    }

    fn ctx() -> ExecutionContext {
        ExecutionContext::new(Trigger::event("test", json!({})))
    }

    fn steps(raw: Value) -> Vec<ActionDef> {
        serde_json::from_value(raw).unwrap()
    }

    #[tokio::test]
    async fn test_sequential_order_and_state_visibility() {
        let exec = executor(Specification::default());
        let mut ctx = ctx();
        let cancel = CancellationToken::new();

        let actions = steps(json!([
            {"action": "record", "tag": "a"},
            {"action": "record", "tag": "b"},
            {"action": "record", "tag": "${seen[0]}"}
        ]));

        let result = exec.run(&actions, &mut ctx, &cancel).await;
        assert!(result.success());
        assert_eq!(ctx.var("seen"), Some(&json!(["a", "b", "a"])));
    }

    #[tokio::test]
    async fn test_failed_action_is_captured_not_thrown() {
        let exec = executor(Specification::default());
        let mut ctx = ctx();
        let cancel = CancellationToken::new();

        let actions = steps(json!([
            {"action": "fail"},
            {"action": "record", "tag": "after"}
        ]));

        let result = exec.run(&actions, &mut ctx, &cancel).await;
        assert!(!result.success());
        assert_eq!(result.control, FlowControl::Completed);
        assert!(!result.outcomes[0].success);
        // Later actions still ran
        assert_eq!(ctx.var("seen"), Some(&json!(["after"])));
    }

    #[tokio::test]
    async fn test_unknown_action_fails_that_step() {
        let exec = executor(Specification::default());
        let result = exec
            .run(
                &steps(json!([{"action": "no_such_action"}])),
                &mut ctx(),
                &CancellationToken::new(),
            )
            .await;
        assert!(!result.outcomes[0].success);
        assert!(result.outcomes[0]
            .error
            .as_deref()
            .unwrap()
            .contains("not found"));
    }

    #[tokio::test]
    async fn test_return_unwinds_one_frame_only() {
        let spec: Specification = serde_json::from_value(json!({
            "flows": [{
                "name": "inner",
                "params": [],
                "actions": [
                    {"action": "record", "tag": "inner-before"},
                    {"action": "return", "value": 42},
                    {"action": "record", "tag": "inner-after"}
                ]
            }]
        }))
        .unwrap();
        let exec = executor(spec);
        let mut ctx = ctx();

        let actions = steps(json!([
            {"action": "call_flow", "flow": "inner"},
            {"action": "record", "tag": "outer-after"}
        ]));

        let result = exec.run(&actions, &mut ctx, &CancellationToken::new()).await;
        assert!(result.success());
        assert_eq!(result.control, FlowControl::Completed);
        assert_eq!(result.outcomes[0].data.as_ref().unwrap()["returned"], 42);
        // The step after return never ran, the caller's did
        assert_eq!(ctx.var("seen"), Some(&json!(["outer-after"])));
    }

    #[tokio::test]
    async fn test_abort_cancels_whole_invocation() {
        let spec: Specification = serde_json::from_value(json!({
            "flows": [{
                "name": "bail",
                "params": [],
                "actions": [{"action": "abort", "reason": "nope"}]
            }]
        }))
        .unwrap();
        let exec = executor(spec);
        let mut ctx = ctx();

        let actions = steps(json!([
            {"action": "call_flow", "flow": "bail"},
            {"action": "record", "tag": "unreachable"}
        ]));

        let result = exec.run(&actions, &mut ctx, &CancellationToken::new()).await;
        assert_eq!(result.control, FlowControl::Aborted("nope".to_string()));
        assert!(ctx.var("seen").is_none());
    }

    #[tokio::test]
    async fn test_recursion_limit_fails_eleventh_call_only() {
        let spec: Specification = serde_json::from_value(json!({
            "flows": [{
                "name": "loop",
                "params": [],
                "actions": [{"action": "call_flow", "flow": "loop"}]
            }]
        }))
        .unwrap();
        let exec = executor(spec);
        let mut ctx = ctx();

        // Root step is depth 1; the chain bottoms out when depth would be 11
        let result = exec
            .run(
                &steps(json!([{"action": "call_flow", "flow": "loop"}])),
                &mut ctx,
                &CancellationToken::new(),
            )
            .await;

        // The root call itself completes: the limit error was absorbed by
        // the immediate caller ten frames down
        assert_eq!(result.outcomes.len(), 1);
        assert!(result.outcomes[0].success);
        assert_eq!(result.control, FlowControl::Completed);
    }

    #[tokio::test]
    async fn test_recursion_limit_error_at_the_limit() {
        let spec: Specification = serde_json::from_value(json!({
            "flows": [{
                "name": "loop",
                "params": [],
                "actions": [{"action": "call_flow", "flow": "loop"}]
            }]
        }))
        .unwrap();
        let exec = executor(spec).with_max_depth(1);
        let mut ctx = ctx();

        let result = exec
            .call_flow("loop", &Map::new(), &mut ctx, &CancellationToken::new())
            .await
            .unwrap();

        // The first frame runs at the limit, so its nested call fails
        assert!(!result.outcomes[0].success);
        assert!(result.outcomes[0]
            .error
            .as_deref()
            .unwrap()
            .contains("recursion limit"));
    }

    #[tokio::test]
    async fn test_cancellation_checked_between_actions() {
        let exec = executor(Specification::default());
        let mut ctx = ctx();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = exec
            .run(&steps(json!([{"action": "record", "tag": "x"}])), &mut ctx, &cancel)
            .await;
        assert_eq!(result.control, FlowControl::Aborted("cancelled".to_string()));
        assert!(result.outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_call_flow_binds_declared_params() {
        let spec: Specification = serde_json::from_value(json!({
            "flows": [{
                "name": "greet",
                "params": ["who"],
                "actions": [{"action": "record", "tag": "${who}"}]
            }]
        }))
        .unwrap();
        let exec = executor(spec);
        let mut ctx = ctx();

        let result = exec
            .run(
                &steps(json!([
                    {"action": "call_flow", "flow": "greet", "args": {"who": "world", "extra": 1}}
                ])),
                &mut ctx,
                &CancellationToken::new(),
            )
            .await;
        assert!(result.success());
    }

    #[tokio::test]
    async fn test_missing_flow_fails_step() {
        let exec = executor(Specification::default());
        let result = exec
            .run(
                &steps(json!([{"action": "call_flow", "flow": "ghost"}])),
                &mut ctx(),
                &CancellationToken::new(),
            )
            .await;
        assert!(!result.outcomes[0].success);
        assert!(result.outcomes[0]
            .error
            .as_deref()
            .unwrap()
            .contains("flow not found"));
    }
}
