//! Timing policy configuration
//!
//! Cooldowns gate commands, debounce/throttle gate event handlers. All
//! windows are fixed durations in milliseconds.

use crate::document::ActionDef;
use serde::{Deserialize, Serialize};

/// Which context dimension forms a cooldown/rate key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum KeyDimension {
    /// Per invoking user (default)
    #[default]
    User,
    /// Per channel
    Channel,
    /// Per guild
    Guild,
}

impl KeyDimension {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyDimension::User => "user",
            KeyDimension::Channel => "channel",
            KeyDimension::Guild => "guild",
        }
    }
}

/// Command cooldown: one run per key per window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooldownConfig {
    /// Window length in milliseconds
    pub duration_ms: u64,

    /// Key dimension the window applies to
    #[serde(default)]
    pub per: KeyDimension,

    /// Actions run instead of the command body while on cooldown
    #[serde(default)]
    pub on_cooldown: Vec<ActionDef>,
}

/// Event debounce: bursts collapse to one execution after a quiet period
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebounceConfig {
    /// Quiet period in milliseconds; each new event restarts it
    pub quiet_ms: u64,

    /// Context fields composing the debounce key fingerprint
    #[serde(default)]
    pub key: Vec<String>,
}

/// Event throttle: at most one execution per window
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Window length in milliseconds
    pub window_ms: u64,

    /// Context fields composing the throttle key fingerprint
    #[serde(default)]
    pub key: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cooldown_deserialize_defaults() {
        let config: CooldownConfig =
            serde_json::from_str(r#"{"duration_ms": 5000}"#).unwrap();
        assert_eq!(config.duration_ms, 5000);
        assert_eq!(config.per, KeyDimension::User);
        assert!(config.on_cooldown.is_empty());
    }

    #[test]
    fn test_debounce_deserialize() {
        let config: DebounceConfig =
            serde_json::from_str(r#"{"quiet_ms": 200, "key": ["guild.id", "user.id"]}"#).unwrap();
        assert_eq!(config.quiet_ms, 200);
        assert_eq!(config.key, vec!["guild.id", "user.id"]);
    }

    #[test]
    fn test_key_dimension_names() {
        assert_eq!(KeyDimension::User.as_str(), "user");
        assert_eq!(KeyDimension::Guild.as_str(), "guild");
    }
}
