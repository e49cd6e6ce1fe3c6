//! Inbound webhook connector
//!
//! The HTTP listener lives in the embedding application; this connector is
//! the admission gate. `admit` verifies the payload against the configured
//! policy (HMAC-SHA256 over the raw body, a prefixed signature header, or a
//! shared token) and only then fires the payload onto the trigger bus. A
//! rejected payload is logged and never forwarded.

use crate::connector::{require_connected, Connector};
use crate::{PipeError, PipeResult, PipeState, PipeStatus, StatusCell};
use async_trait::async_trait;
use bw_bus::SharedTriggerBus;
use bw_core::Trigger;
use bw_spec::VerifyConfig;
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use std::collections::HashMap;
use tracing::{debug, warn};

type HmacSha256 = Hmac<Sha256>;

/// Inbound webhook pipe
pub struct WebhookPipe {
    name: String,
    verify: Option<VerifyConfig>,
    bus: SharedTriggerBus,
    status: StatusCell,
}

impl WebhookPipe {
    pub fn new(
        name: impl Into<String>,
        verify: Option<VerifyConfig>,
        bus: SharedTriggerBus,
    ) -> Self {
        let name = name.into();
        Self {
            status: StatusCell::new(&name),
            name,
            verify,
            bus,
        }
    }

    /// Verify and forward one inbound payload
    ///
    /// Header names are matched case-insensitively. On success the body is
    /// parsed as JSON and fired as a pipe-message trigger.
    pub fn admit(&self, headers: &HashMap<String, String>, body: &[u8]) -> PipeResult<()> {
        require_connected(&self.name, self.status.state())?;

        if let Some(verify) = &self.verify {
            if let Err(err) = self.check(verify, headers, body) {
                warn!(pipe = %self.name, error = %err, "Webhook payload rejected");
                return Err(err);
            }
        }

        let payload: Value = serde_json::from_slice(body)?;
        debug!(pipe = %self.name, "Webhook payload admitted");
        self.bus.fire(Trigger::pipe_message(&self.name, payload));
        Ok(())
    }

    fn check(
        &self,
        verify: &VerifyConfig,
        headers: &HashMap<String, String>,
        body: &[u8],
    ) -> PipeResult<()> {
        match verify {
            VerifyConfig::Hmac { header, secret } => {
                let provided = header_value(headers, header)
                    .ok_or_else(|| self.reject("missing signature header"))?;
                self.check_hmac(secret, provided, body)
            }
            VerifyConfig::Signature {
                header,
                secret,
                prefix,
            } => {
                let provided = header_value(headers, header)
                    .ok_or_else(|| self.reject("missing signature header"))?;
                let provided = provided
                    .strip_prefix(prefix.as_str())
                    .ok_or_else(|| self.reject("signature prefix mismatch"))?;
                self.check_hmac(secret, provided, body)
            }
            VerifyConfig::Token { header, token } => {
                let provided = header_value(headers, header)
                    .ok_or_else(|| self.reject("missing token header"))?;
                // Compared via HMAC tags rather than string equality so a
                // timing side channel cannot leak the token
                let mut expected =
                    HmacSha256::new_from_slice(token.as_bytes()).map_err(|_| {
                        self.reject("empty token")
                    })?;
                expected.update(b"token");
                let tag = expected.finalize().into_bytes();

                let mut provided_mac = HmacSha256::new_from_slice(provided.as_bytes())
                    .map_err(|_| self.reject("empty token header"))?;
                provided_mac.update(b"token");
                if provided_mac.finalize().into_bytes() == tag {
                    Ok(())
                } else {
                    Err(self.reject("token mismatch"))
                }
            }
        }
    }

    fn check_hmac(&self, secret: &str, provided_hex: &str, body: &[u8]) -> PipeResult<()> {
        let provided = hex::decode(provided_hex.trim())
            .map_err(|_| self.reject("signature is not valid hex"))?;
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|_| self.reject("empty secret"))?;
        mac.update(body);
        mac.verify_slice(&provided)
            .map_err(|_| self.reject("signature mismatch"))
    }

    fn reject(&self, reason: &str) -> PipeError {
        PipeError::Verification {
            name: self.name.clone(),
            reason: reason.to_string(),
        }
    }
}

fn header_value<'a>(headers: &'a HashMap<String, String>, name: &str) -> Option<&'a str> {
    headers
        .iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v.as_str())
}

#[async_trait]
impl Connector for WebhookPipe {
    fn kind(&self) -> &'static str {
        "webhook"
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

    async fn send(&self, _message: Value) -> PipeResult<Option<Value>> {
        Err(PipeError::NotSupported {
            name: self.name.clone(),
            operation: "send",
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bw_bus::TriggerBus;
    use serde_json::json;
    use std::sync::Arc;

    fn sign(secret: &str, body: &[u8]) -> String {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        hex::encode(mac.finalize().into_bytes())
    }

    fn pipe(verify: Option<VerifyConfig>) -> (WebhookPipe, SharedTriggerBus) {
        let bus = Arc::new(TriggerBus::new());
        (WebhookPipe::new("hook", verify, bus.clone()), bus)
    }

    #[tokio::test]
    async fn test_hmac_verified_payload_forwarded() {
        let (pipe, bus) = pipe(Some(VerifyConfig::Hmac {
            header: "X-Signature".to_string(),
            secret: "s3cret".to_string(),
        }));
        pipe.connect().await.unwrap();
        let mut rx = bus.subscribe("hook");

        let body = br#"{"event": "push"}"#;
        let mut headers = HashMap::new();
        headers.insert("x-signature".to_string(), sign("s3cret", body));

        pipe.admit(&headers, body).unwrap();
        let trigger = rx.recv().await.unwrap();
        assert_eq!(trigger.payload["event"], "push");
    }

    #[tokio::test]
    async fn test_bad_signature_rejected_and_not_forwarded() {
        let (pipe, bus) = pipe(Some(VerifyConfig::Hmac {
            header: "X-Signature".to_string(),
            secret: "s3cret".to_string(),
        }));
        pipe.connect().await.unwrap();
        let mut rx = bus.subscribe("hook");

        let body = br#"{"event": "push"}"#;
        let mut headers = HashMap::new();
        headers.insert("x-signature".to_string(), sign("wrong", body));

        let err = pipe.admit(&headers, body).unwrap_err();
        assert!(matches!(err, PipeError::Verification { .. }));
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_prefixed_signature() {
        let (pipe, _bus) = pipe(Some(VerifyConfig::Signature {
            header: "X-Hub-Signature-256".to_string(),
            secret: "s3cret".to_string(),
            prefix: "sha256=".to_string(),
        }));
        pipe.connect().await.unwrap();

        let body = br#"{"n": 1}"#;
        let mut headers = HashMap::new();
        headers.insert(
            "X-Hub-Signature-256".to_string(),
            format!("sha256={}", sign("s3cret", body)),
        );
        pipe.admit(&headers, body).unwrap();

        headers.insert(
            "X-Hub-Signature-256".to_string(),
            sign("s3cret", body),
        );
        assert!(pipe.admit(&headers, body).is_err());
    }

    #[tokio::test]
    async fn test_token_verification() {
        let (pipe, _bus) = pipe(Some(VerifyConfig::Token {
            header: "X-Token".to_string(),
            token: "open-sesame".to_string(),
        }));
        pipe.connect().await.unwrap();

        let body = br#"{}"#;
        let mut headers = HashMap::new();
        headers.insert("X-Token".to_string(), "open-sesame".to_string());
        pipe.admit(&headers, body).unwrap();

        headers.insert("X-Token".to_string(), "wrong".to_string());
        assert!(pipe.admit(&headers, body).is_err());
    }

    #[tokio::test]
    async fn test_admit_requires_connect() {
        let (pipe, _bus) = pipe(None);
        let err = pipe.admit(&HashMap::new(), br#"{}"#).unwrap_err();
        assert!(matches!(err, PipeError::Unavailable { .. }));
    }

    #[tokio::test]
    async fn test_unverified_pipe_admits_json() {
        let (pipe, bus) = pipe(None);
        pipe.connect().await.unwrap();
        let mut rx = bus.subscribe("hook");
        pipe.admit(&HashMap::new(), br#"{"ok": true}"#).unwrap();
        assert_eq!(rx.recv().await.unwrap().payload, json!({"ok": true}));
    }
}
