//! Outbound HTTP connector
//!
//! Stateless at the transport level; connect/disconnect only gate whether
//! sends are admitted. Each send applies the configured auth, passes the
//! sliding-window rate limiter, and retries transient failures (network
//! errors and 5xx responses) a fixed number of times.

use crate::connector::{require_connected, Connector};
use crate::{PipeError, PipeResult, PipeState, PipeStatus, StatusCell};
use async_trait::async_trait;
use bw_spec::{AuthConfig, RateLimitConfig, RetryConfig};
use serde_json::{json, Value};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Sliding-window request rate limiter
struct RateLimiter {
    config: RateLimitConfig,
    window: Mutex<VecDeque<Instant>>,
}

impl RateLimiter {
    fn new(config: RateLimitConfig) -> Self {
        Self {
            config,
            window: Mutex::new(VecDeque::new()),
        }
    }

    /// Try to take one slot right now
    fn try_acquire(&self) -> bool {
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        let cutoff = Instant::now() - Duration::from_millis(self.config.window_ms);
        while window.front().is_some_and(|t| *t < cutoff) {
            window.pop_front();
        }
        if window.len() < self.config.max_requests as usize {
            window.push_back(Instant::now());
            true
        } else {
            false
        }
    }

    /// Take a slot, waiting once if the config allows queue-and-delay
    async fn acquire(&self, pipe: &str) -> PipeResult<()> {
        if self.try_acquire() {
            return Ok(());
        }
        match self.config.retry_after_ms {
            Some(wait) => {
                debug!(pipe = %pipe, wait_ms = wait, "Rate limit hit, delaying request");
                tokio::time::sleep(Duration::from_millis(wait)).await;
                if self.try_acquire() {
                    Ok(())
                } else {
                    Err(PipeError::RateLimitExceeded {
                        name: pipe.to_string(),
                    })
                }
            }
            None => Err(PipeError::RateLimitExceeded {
                name: pipe.to_string(),
            }),
        }
    }
}

/// HTTP pipe over a base URL
pub struct HttpPipe {
    name: String,
    base_url: String,
    auth: AuthConfig,
    retry: Option<RetryConfig>,
    headers: HashMap<String, String>,
    rate: Option<RateLimiter>,
    client: reqwest::Client,
    status: StatusCell,
}

impl HttpPipe {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        auth: AuthConfig,
        rate_limit: Option<RateLimitConfig>,
        retry: Option<RetryConfig>,
        headers: HashMap<String, String>,
    ) -> Self {
        let name = name.into();
        Self {
            status: StatusCell::new(&name),
            name,
            base_url: base_url.into(),
            auth,
            retry,
            headers,
            rate: rate_limit.map(RateLimiter::new),
            client: reqwest::Client::new(),
        }
    }

    fn build_request(&self, message: &Value) -> PipeResult<reqwest::RequestBuilder> {
        let method = message
            .get("method")
            .and_then(Value::as_str)
            .unwrap_or("get");
        let method = reqwest::Method::from_bytes(method.to_uppercase().as_bytes())
            .map_err(|_| PipeError::BadMessage(format!("unknown http method '{}'", method)))?;

        let path = message.get("path").and_then(Value::as_str).unwrap_or("");
        let url = format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        );

        let mut request = self.client.request(method, url);

        for (key, value) in &self.headers {
            request = request.header(key, value);
        }
        if let Some(extra) = message.get("headers").and_then(Value::as_object) {
            for (key, value) in extra {
                if let Some(v) = value.as_str() {
                    request = request.header(key, v);
                }
            }
        }

        request = match &self.auth {
            AuthConfig::None => request,
            AuthConfig::Header { name, value } => request.header(name, value),
            AuthConfig::Bearer { token } => request.bearer_auth(token),
            AuthConfig::Basic { username, password } => {
                request.basic_auth(username, password.as_deref())
            }
        };

        if let Some(query) = message.get("query").and_then(Value::as_object) {
            let pairs: Vec<(String, String)> = query
                .iter()
                .map(|(k, v)| {
                    let v = match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    };
                    (k.clone(), v)
                })
                .collect();
            request = request.query(&pairs);
        }

        if let Some(body) = message.get("body") {
            request = request.json(body);
        }

        Ok(request)
    }

    async fn execute_once(&self, message: &Value) -> PipeResult<reqwest::Response> {
        let request = self.build_request(message)?;
        Ok(request.send().await?)
    }
}

#[async_trait]
impl Connector for HttpPipe {
    fn kind(&self) -> &'static str {
        "http"
    }

    fn status(&self) -> PipeStatus {
        self.status.snapshot()
    }

    async fn connect(&self) -> PipeResult<()> {
        self.status.transition(PipeState::Connecting)?;
        self.status.transition(PipeState::Connected)?;
        Ok(())
    }

    async fn disconnect(&self) -> PipeResult<()> {
        self.status.transition(PipeState::Disconnected)
    }

    async fn send(&self, message: Value) -> PipeResult<Option<Value>> {
        require_connected(&self.name, self.status.state())?;

        if let Some(rate) = &self.rate {
            rate.acquire(&self.name).await?;
        }

        let (attempts, delay_ms) = match &self.retry {
            Some(retry) => (retry.attempts.max(1), retry.delay_ms),
            None => (1, 0),
        };

        let mut last_error = None;
        for attempt in 1..=attempts {
            match self.execute_once(&message).await {
                Ok(response) if response.status().is_server_error() => {
                    warn!(
                        pipe = %self.name, attempt,
                        status = response.status().as_u16(),
                        "Transient http failure"
                    );
                    last_error = Some(PipeError::Send {
                        name: self.name.clone(),
                        reason: format!("server returned {}", response.status()),
                    });
                }
                Ok(response) => {
                    let status = response.status().as_u16();
                    let body = response.json::<Value>().await.unwrap_or(Value::Null);
                    return Ok(Some(json!({"status": status, "body": body})));
                }
                Err(PipeError::Http(err)) if err.is_connect() || err.is_timeout() => {
                    warn!(pipe = %self.name, attempt, error = %err, "Transient http failure");
                    last_error = Some(PipeError::Http(err));
                }
                Err(err) => return Err(err),
            }
            if attempt < attempts {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
        }

        let err = last_error.unwrap_or_else(|| PipeError::Send {
            name: self.name.clone(),
            reason: "request failed".to_string(),
        });
        self.status.record_error(err.to_string());
        Err(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(max: u32, window_ms: u64, retry_after_ms: Option<u64>) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            max_requests: max,
            window_ms,
            retry_after_ms,
        })
    }

    #[test]
    fn test_rate_limiter_window() {
        let rate = limiter(2, 60_000, None);
        assert!(rate.try_acquire());
        assert!(rate.try_acquire());
        assert!(!rate.try_acquire());
    }

    #[tokio::test]
    async fn test_rate_limiter_fail_fast_without_retry_after() {
        let rate = limiter(1, 60_000, None);
        rate.acquire("api").await.unwrap();
        let err = rate.acquire("api").await.unwrap_err();
        assert!(matches!(err, PipeError::RateLimitExceeded { .. }));
    }

    #[tokio::test]
    async fn test_rate_limiter_delays_with_retry_after() {
        let rate = limiter(1, 20, Some(30));
        rate.acquire("api").await.unwrap();
        // Second acquire waits past the 20ms window and then succeeds
        rate.acquire("api").await.unwrap();
    }

    #[tokio::test]
    async fn test_send_requires_connect() {
        let pipe = HttpPipe::new(
            "api",
            "http://127.0.0.1:1",
            AuthConfig::None,
            None,
            None,
            HashMap::new(),
        );
        let err = pipe.send(json!({"path": "/x"})).await.unwrap_err();
        assert!(matches!(err, PipeError::Unavailable { .. }));
    }

    #[test]
    fn test_build_request_rejects_bad_method() {
        let pipe = HttpPipe::new(
            "api",
            "http://example.com",
            AuthConfig::None,
            None,
            None,
            HashMap::new(),
        );
        let err = pipe
            .build_request(&json!({"method": "b a d"}))
            .unwrap_err();
        assert!(matches!(err, PipeError::BadMessage(_)));
    }
}
