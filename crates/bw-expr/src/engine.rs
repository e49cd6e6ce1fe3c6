//! Expression engine
//!
//! Wraps a minijinja environment configured for expression evaluation.
//! The async entry point races evaluation on a blocking thread against a
//! timeout so a pathological expression can never stall the dispatch loop;
//! `evaluate_sync` is the unbounded variant for call sites that cannot
//! suspend.

use crate::context::ExprContext;
use crate::error::{ExprError, ExprResult};
use crate::interpolate;
use minijinja::value::Rest;
use minijinja::{Environment, UndefinedBehavior, Value as MjValue};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{trace, warn};

/// Default evaluation timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_millis(5000);

struct EngineInner {
    env: Environment<'static>,
    timeout: Duration,
}

impl EngineInner {
    fn eval(&self, expr: &str, ctx: &ExprContext) -> ExprResult<Value> {
        trace!(expr = %expr, "Evaluating expression");

        let compiled = self
            .env
            .compile_expression(expr)
            .map_err(ExprError::from_minijinja)?;
        let value = compiled
            .eval(ctx.to_minijinja())
            .map_err(ExprError::from_minijinja)?;

        serde_json::to_value(&value).map_err(|e| ExprError::Eval(e.to_string()))
    }
}

/// Builder for [`ExprEngine`]
///
/// Custom functions and transforms register here, before the engine is
/// built and used. Registering a name twice overwrites the earlier
/// registration and emits a warning.
pub struct ExprEngineBuilder {
    env: Environment<'static>,
    registered: HashSet<String>,
    timeout: Duration,
}

impl ExprEngineBuilder {
    /// Create a builder with the standard function/transform set registered
    pub fn new() -> Self {
        let mut builder = Self {
            env: Environment::new(),
            registered: HashSet::new(),
            timeout: DEFAULT_TIMEOUT,
        };
        builder.register_defaults();
        builder
    }

    /// Set the evaluation timeout for `evaluate`
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Strict mode: referencing an absent name is an error instead of
    /// silently producing an empty value
    pub fn strict(mut self, strict: bool) -> Self {
        let behavior = if strict {
            UndefinedBehavior::Strict
        } else {
            UndefinedBehavior::Lenient
        };
        self.env.set_undefined_behavior(behavior);
        self
    }

    /// Register a custom function callable as `name(args...)`
    pub fn function<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(&[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.note_registration(name);
        self.env.add_function(
            name.to_string(),
            move |args: Rest<MjValue>| -> Result<MjValue, minijinja::Error> {
                let json_args: Vec<Value> = args
                    .0
                    .iter()
                    .map(|v| serde_json::to_value(v).unwrap_or(Value::Null))
                    .collect();
                f(&json_args)
                    .map(|v| MjValue::from_serialize(&v))
                    .map_err(|msg| {
                        minijinja::Error::new(minijinja::ErrorKind::InvalidOperation, msg)
                    })
            },
        );
        self
    }

    /// Register a custom transform usable as `value | name(args...)`
    pub fn transform<F>(mut self, name: &str, f: F) -> Self
    where
        F: Fn(Value, &[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        self.note_registration(name);
        self.env.add_filter(
            name.to_string(),
            move |value: MjValue, args: Rest<MjValue>| -> Result<MjValue, minijinja::Error> {
                let json_value = serde_json::to_value(&value).unwrap_or(Value::Null);
                let json_args: Vec<Value> = args
                    .0
                    .iter()
                    .map(|v| serde_json::to_value(v).unwrap_or(Value::Null))
                    .collect();
                f(json_value, &json_args)
                    .map(|v| MjValue::from_serialize(&v))
                    .map_err(|msg| {
                        minijinja::Error::new(minijinja::ErrorKind::InvalidOperation, msg)
                    })
            },
        );
        self
    }

    /// Build the engine; no further registration is possible afterwards
    pub fn build(self) -> ExprEngine {
        ExprEngine {
            inner: Arc::new(EngineInner {
                env: self.env,
                timeout: self.timeout,
            }),
        }
    }

    fn note_registration(&mut self, name: &str) {
        if !self.registered.insert(name.to_string()) {
            warn!(name = %name, "Overwriting existing expression function/transform");
        }
    }

    fn register_defaults(&mut self) {
        for name in [
            "now",
            "timestamp",
            "random",
            "to_json",
            "from_json",
            "regex_match",
            "regex_replace",
        ] {
            self.registered.insert(name.to_string());
        }

        self.env.add_function("now", || -> String {
            chrono::Utc::now().to_rfc3339()
        });

        self.env.add_function("timestamp", || -> i64 {
            chrono::Utc::now().timestamp()
        });

        self.env.add_function("random", |n: u64| -> Result<u64, minijinja::Error> {
            if n == 0 {
                return Err(minijinja::Error::new(
                    minijinja::ErrorKind::InvalidOperation,
                    "random(n) requires n > 0",
                ));
            }
            let mut buf = [0u8; 8];
            getrandom::fill(&mut buf).map_err(|e| {
                minijinja::Error::new(
                    minijinja::ErrorKind::InvalidOperation,
                    format!("entropy source failed: {}", e),
                )
            })?;
            Ok(u64::from_le_bytes(buf) % n)
        });

        self.env.add_filter(
            "to_json",
            |value: MjValue| -> Result<String, minijinja::Error> {
                let json = serde_json::to_value(&value).unwrap_or(Value::Null);
                serde_json::to_string(&json).map_err(|e| {
                    minijinja::Error::new(minijinja::ErrorKind::InvalidOperation, e.to_string())
                })
            },
        );

        self.env.add_filter(
            "from_json",
            |value: String| -> Result<MjValue, minijinja::Error> {
                let parsed: Value = serde_json::from_str(&value).map_err(|e| {
                    minijinja::Error::new(
                        minijinja::ErrorKind::InvalidOperation,
                        format!("invalid JSON: {}", e),
                    )
                })?;
                Ok(MjValue::from_serialize(&parsed))
            },
        );

        self.env.add_filter(
            "regex_match",
            |value: String, pattern: String| -> Result<bool, minijinja::Error> {
                let re = regex::Regex::new(&pattern).map_err(|e| {
                    minijinja::Error::new(
                        minijinja::ErrorKind::InvalidOperation,
                        format!("invalid regex: {}", e),
                    )
                })?;
                Ok(re.is_match(&value))
            },
        );

        self.env.add_filter(
            "regex_replace",
            |value: String, pattern: String, replacement: String| -> Result<String, minijinja::Error> {
                let re = regex::Regex::new(&pattern).map_err(|e| {
                    minijinja::Error::new(
                        minijinja::ErrorKind::InvalidOperation,
                        format!("invalid regex: {}", e),
                    )
                })?;
                Ok(re.replace_all(&value, replacement.as_str()).into_owned())
            },
        );
    }
}

impl Default for ExprEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The expression engine
///
/// Cheap to clone; all clones share one compiled environment.
#[derive(Clone)]
pub struct ExprEngine {
    inner: Arc<EngineInner>,
}

impl ExprEngine {
    /// An engine with default settings
    pub fn new() -> Self {
        ExprEngineBuilder::new().build()
    }

    /// The configured evaluation timeout
    pub fn timeout(&self) -> Duration {
        self.inner.timeout
    }

    /// Evaluate an expression, racing against the configured timeout
    ///
    /// Evaluation runs on a blocking thread; if the timeout elapses first,
    /// the result is abandoned and `ExprError::Timeout` is returned. Only
    /// this evaluation is affected; the caller's flow continues.
    pub async fn evaluate(&self, expr: &str, ctx: &ExprContext) -> ExprResult<Value> {
        let inner = self.inner.clone();
        let expr = expr.to_string();
        let ctx = ctx.clone();

        let handle = tokio::task::spawn_blocking(move || inner.eval(&expr, &ctx));

        match tokio::time::timeout(self.inner.timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(ExprError::Eval(join_err.to_string())),
            Err(_) => Err(ExprError::Timeout(self.inner.timeout.as_millis() as u64)),
        }
    }

    /// Unbounded, non-suspending evaluation
    pub fn evaluate_sync(&self, expr: &str, ctx: &ExprContext) -> ExprResult<Value> {
        self.inner.eval(expr, ctx)
    }

    /// Substitute every `${...}` token in a template
    ///
    /// Tokens are evaluated left to right; values substitute as their
    /// display form (null/undefined as the empty string). A template with
    /// no tokens passes through unchanged.
    pub fn interpolate(&self, template: &str, ctx: &ExprContext) -> ExprResult<String> {
        interpolate::interpolate(self, template, ctx)
    }

    /// Recursively render `${...}` tokens inside a JSON value
    ///
    /// A string that is exactly one token keeps the evaluated value's type;
    /// any other string interpolates to a string. Objects and arrays
    /// recurse; other values pass through.
    pub fn render_value(&self, value: &Value, ctx: &ExprContext) -> ExprResult<Value> {
        match value {
            Value::String(s) => {
                if let Some(token) = interpolate::single_token(s) {
                    self.evaluate_sync(token, ctx)
                } else if interpolate::has_tokens(s) {
                    Ok(Value::String(self.interpolate(s, ctx)?))
                } else {
                    Ok(value.clone())
                }
            }
            Value::Object(map) => {
                let mut rendered = serde_json::Map::new();
                for (k, v) in map {
                    rendered.insert(k.clone(), self.render_value(v, ctx)?);
                }
                Ok(Value::Object(rendered))
            }
            Value::Array(items) => {
                let rendered: ExprResult<Vec<Value>> =
                    items.iter().map(|v| self.render_value(v, ctx)).collect();
                Ok(Value::Array(rendered?))
            }
            _ => Ok(value.clone()),
        }
    }
}

impl Default for ExprEngine {
    fn default() -> Self {
        Self::new()
    }
}
