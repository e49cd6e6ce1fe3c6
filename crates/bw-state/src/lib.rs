//! Scoped state storage for botwright
//!
//! State variables are namespaced by scope (global/guild/channel/user/member)
//! and may carry a TTL. The engine consumes storage through the StateBackend
//! trait; StateStore is the default in-memory implementation. Persistent
//! backends plug in behind the same trait.

use bw_core::ScopeKey;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, trace};

/// Errors from state operations
#[derive(Debug, Error)]
pub enum StateError {
    #[error("storage backend failure: {0}")]
    Backend(String),
}

/// Result type for state operations
pub type StateResult<T> = Result<T, StateError>;

/// Storage collaborator interface
///
/// Reads of expired entries behave as if the entry were absent.
pub trait StateBackend: Send + Sync {
    /// Get a variable, or None when absent or expired
    fn get(&self, scope: &ScopeKey, name: &str) -> StateResult<Option<serde_json::Value>>;

    /// Set a variable, with an optional time-to-live
    fn set(
        &self,
        scope: &ScopeKey,
        name: &str,
        value: serde_json::Value,
        ttl: Option<std::time::Duration>,
    ) -> StateResult<()>;

    /// Delete a variable; returns whether it existed
    fn delete(&self, scope: &ScopeKey, name: &str) -> StateResult<bool>;
}

/// A stored value with optional expiry
#[derive(Debug, Clone)]
struct Entry {
    value: serde_json::Value,
    expires_at: Option<DateTime<Utc>>,
}

impl Entry {
    fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.map(|at| at <= now).unwrap_or(false)
    }
}

/// In-memory state store with lazy TTL expiry
pub struct StateStore {
    entries: DashMap<String, Entry>,
}

impl StateStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    fn key(scope: &ScopeKey, name: &str) -> String {
        format!("{}:{}", scope.storage_prefix(), name)
    }

    /// Number of live (non-expired) entries
    pub fn len(&self) -> usize {
        let now = Utc::now();
        self.entries.iter().filter(|e| !e.is_expired(now)).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop expired entries eagerly
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, e| !e.is_expired(now));
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(removed, "Purged expired state entries");
        }
        removed
    }
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateBackend for StateStore {
    fn get(&self, scope: &ScopeKey, name: &str) -> StateResult<Option<serde_json::Value>> {
        let key = Self::key(scope, name);
        let now = Utc::now();

        if let Some(entry) = self.entries.get(&key) {
            if entry.is_expired(now) {
                drop(entry);
                self.entries.remove(&key);
                trace!(key = %key, "State entry expired on read");
                return Ok(None);
            }
            return Ok(Some(entry.value.clone()));
        }
        Ok(None)
    }

    fn set(
        &self,
        scope: &ScopeKey,
        name: &str,
        value: serde_json::Value,
        ttl: Option<std::time::Duration>,
    ) -> StateResult<()> {
        let key = Self::key(scope, name);
        let expires_at = ttl.and_then(|d| {
            Duration::from_std(d)
                .ok()
                .map(|chrono_ttl| Utc::now() + chrono_ttl)
        });

        trace!(key = %key, ttl = ?ttl, "Setting state entry");
        self.entries.insert(key, Entry { value, expires_at });
        Ok(())
    }

    fn delete(&self, scope: &ScopeKey, name: &str) -> StateResult<bool> {
        let key = Self::key(scope, name);
        Ok(self.entries.remove(&key).is_some())
    }
}

/// Thread-safe wrapper for a state backend
pub type SharedStateBackend = Arc<dyn StateBackend>;

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration as StdDuration;

    #[test]
    fn test_set_get_delete() {
        let store = StateStore::new();
        let scope = ScopeKey::guild("g1");

        store.set(&scope, "greeting", json!("hello"), None).unwrap();
        assert_eq!(store.get(&scope, "greeting").unwrap(), Some(json!("hello")));

        assert!(store.delete(&scope, "greeting").unwrap());
        assert_eq!(store.get(&scope, "greeting").unwrap(), None);
        assert!(!store.delete(&scope, "greeting").unwrap());
    }

    #[test]
    fn test_scopes_are_isolated() {
        let store = StateStore::new();

        store
            .set(&ScopeKey::user("u1"), "count", json!(1), None)
            .unwrap();
        store
            .set(&ScopeKey::user("u2"), "count", json!(2), None)
            .unwrap();
        store
            .set(&ScopeKey::member("g1", "u1"), "count", json!(3), None)
            .unwrap();

        assert_eq!(
            store.get(&ScopeKey::user("u1"), "count").unwrap(),
            Some(json!(1))
        );
        assert_eq!(
            store.get(&ScopeKey::user("u2"), "count").unwrap(),
            Some(json!(2))
        );
        assert_eq!(
            store.get(&ScopeKey::member("g1", "u1"), "count").unwrap(),
            Some(json!(3))
        );
    }

    #[test]
    fn test_ttl_expiry() {
        let store = StateStore::new();
        let scope = ScopeKey::global();

        store
            .set(&scope, "flash", json!(true), Some(StdDuration::ZERO))
            .unwrap();

        // TTL of zero expires immediately
        assert_eq!(store.get(&scope, "flash").unwrap(), None);
    }

    #[test]
    fn test_purge_expired() {
        let store = StateStore::new();
        let scope = ScopeKey::global();

        store
            .set(&scope, "a", json!(1), Some(StdDuration::ZERO))
            .unwrap();
        store.set(&scope, "b", json!(2), None).unwrap();

        assert_eq!(store.purge_expired(), 1);
        assert_eq!(store.get(&scope, "b").unwrap(), Some(json!(2)));
    }
}
