//! State variable scoping
//!
//! State variables live under one of five namespaces. A ScopeKey pairs the
//! namespace with the identifier that selects the concrete bucket (guild id,
//! channel id, user id, or "guild:user" for member scope).

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Namespace under which a state variable is stored
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    Global,
    Guild,
    Channel,
    User,
    Member,
}

impl Scope {
    /// Scope name as used in storage keys and documents
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Global => "global",
            Scope::Guild => "guild",
            Scope::Channel => "channel",
            Scope::User => "user",
            Scope::Member => "member",
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Error parsing a scope name
#[derive(Debug, Error)]
#[error("unknown scope '{0}', expected global/guild/channel/user/member")]
pub struct ScopeParseError(String);

impl std::str::FromStr for Scope {
    type Err = ScopeParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(Scope::Global),
            "guild" => Ok(Scope::Guild),
            "channel" => Ok(Scope::Channel),
            "user" => Ok(Scope::User),
            "member" => Ok(Scope::Member),
            other => Err(ScopeParseError(other.to_string())),
        }
    }
}

/// A fully resolved scope: namespace plus the selecting identifier
///
/// Global scope carries no identifier; member scope joins guild and user
/// ids so two users in different guilds never collide.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ScopeKey {
    pub scope: Scope,
    pub id: String,
}

impl ScopeKey {
    pub fn global() -> Self {
        Self {
            scope: Scope::Global,
            id: String::new(),
        }
    }

    pub fn guild(id: impl Into<String>) -> Self {
        Self {
            scope: Scope::Guild,
            id: id.into(),
        }
    }

    pub fn channel(id: impl Into<String>) -> Self {
        Self {
            scope: Scope::Channel,
            id: id.into(),
        }
    }

    pub fn user(id: impl Into<String>) -> Self {
        Self {
            scope: Scope::User,
            id: id.into(),
        }
    }

    pub fn member(guild_id: &str, user_id: &str) -> Self {
        Self {
            scope: Scope::Member,
            id: format!("{}:{}", guild_id, user_id),
        }
    }

    /// Storage key prefix for this scope bucket
    pub fn storage_prefix(&self) -> String {
        format!("{}:{}", self.scope, self.id)
    }
}
