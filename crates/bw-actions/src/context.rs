//! Per-invocation execution context

use bw_core::{ActionOutcome, Scope, ScopeKey, Trigger};
use serde_json::{json, Map, Value};

/// Mutable state for one command/event/flow invocation
///
/// The variable map doubles as the expression scope: the trigger payload's
/// top-level fields are merged in at construction so documents can write
/// `user.level` instead of `payload.user.level`, and the full payload stays
/// reachable under `payload`.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub trigger: Trigger,
    vars: Map<String, Value>,
    replies: Vec<String>,
    results: Vec<ActionOutcome>,
}

impl ExecutionContext {
    pub fn new(trigger: Trigger) -> Self {
        let mut vars = Map::new();
        if let Value::Object(fields) = &trigger.payload {
            for (key, value) in fields {
                vars.insert(key.clone(), value.clone());
            }
        }
        vars.insert("payload".to_string(), trigger.payload.clone());
        vars.insert(
            "trigger".to_string(),
            json!({
                "kind": trigger.kind.to_string(),
                "name": trigger.name,
            }),
        );

        Self {
            trigger,
            vars,
            replies: Vec::new(),
            results: Vec::new(),
        }
    }

    /// Fresh context for a called flow: same trigger, vars replaced by the
    /// bound parameters
    pub fn child(&self, params: Map<String, Value>) -> Self {
        let mut child = Self::new(self.trigger.clone());
        for (key, value) in params {
            child.vars.insert(key, value);
        }
        child
    }

    pub fn var(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    pub fn set_var(&mut self, name: impl Into<String>, value: Value) {
        self.vars.insert(name.into(), value);
    }

    /// The full variable map, used as the expression scope
    pub fn vars(&self) -> &Map<String, Value> {
        &self.vars
    }

    /// Resolve a scope against the trigger's origin ids
    ///
    /// Scopes whose selecting id is absent from the context fall back to an
    /// empty id rather than failing; a bot running outside a guild still has
    /// a usable user scope.
    pub fn scope_key(&self, scope: Scope) -> ScopeKey {
        let ctx = &self.trigger.context;
        let missing = String::new;
        match scope {
            Scope::Global => ScopeKey::global(),
            Scope::Guild => ScopeKey::guild(ctx.guild_id.clone().unwrap_or_else(missing)),
            Scope::Channel => ScopeKey::channel(ctx.channel_id.clone().unwrap_or_else(missing)),
            Scope::User => ScopeKey::user(ctx.user_id.clone().unwrap_or_else(missing)),
            Scope::Member => ScopeKey::member(
                ctx.guild_id.as_deref().unwrap_or(""),
                ctx.user_id.as_deref().unwrap_or(""),
            ),
        }
    }

    pub fn push_reply(&mut self, content: impl Into<String>) {
        self.replies.push(content.into());
    }

    pub fn replies(&self) -> &[String] {
        &self.replies
    }

    pub fn push_result(&mut self, outcome: ActionOutcome) {
        self.results.push(outcome);
    }

    pub fn results(&self) -> &[ActionOutcome] {
        &self.results
    }

    pub fn take_results(&mut self) -> Vec<ActionOutcome> {
        std::mem::take(&mut self.results)
    }

    /// Fold a finished child flow's replies back into this context
    pub fn absorb_replies(&mut self, child: &ExecutionContext) {
        self.replies.extend(child.replies.iter().cloned());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bw_core::Context;

    fn ctx() -> ExecutionContext {
        let trigger = Trigger::command(
            "rank",
            json!({"user": {"id": "u1", "level": 7}}),
            Context::with_user("u1").in_guild("g1").in_channel("c1"),
        );
        ExecutionContext::new(trigger)
    }

    #[test]
    fn test_payload_fields_merged_into_vars() {
        let ctx = ctx();
        assert_eq!(ctx.var("user").unwrap()["level"], 7);
        assert_eq!(ctx.var("payload").unwrap()["user"]["id"], "u1");
        assert_eq!(ctx.var("trigger").unwrap()["name"], "rank");
    }

    #[test]
    fn test_scope_key_resolution() {
        let ctx = ctx();
        assert_eq!(ctx.scope_key(Scope::User), ScopeKey::user("u1"));
        assert_eq!(ctx.scope_key(Scope::Guild), ScopeKey::guild("g1"));
        assert_eq!(ctx.scope_key(Scope::Member), ScopeKey::member("g1", "u1"));
    }

    #[test]
    fn test_child_binds_params_fresh() {
        let mut parent = ctx();
        parent.set_var("scratch", json!(1));

        let mut params = Map::new();
        params.insert("message".to_string(), json!("hi"));
        let child = parent.child(params);

        assert_eq!(child.var("message"), Some(&json!("hi")));
        assert!(child.var("scratch").is_none());
        // Trigger seeds still present
        assert_eq!(child.var("trigger").unwrap()["name"], "rank");
    }

    #[test]
    fn test_absorb_replies() {
        let mut parent = ctx();
        let mut child = parent.child(Map::new());
        child.push_reply("from flow");
        parent.absorb_replies(&child);
        assert_eq!(parent.replies(), &["from flow".to_string()]);
    }
}
