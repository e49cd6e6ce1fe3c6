//! Timing gates: cooldown/throttle windows, debounce, once-only handlers

use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::trace;

/// Fixed-window gate shared by cooldowns and throttles
///
/// `check` admits the first hit for a key and refuses further hits until
/// the window has fully elapsed. A refused hit does NOT refresh the window:
/// repeated attempts cannot keep a key locked out forever.
pub struct WindowGate {
    hits: DashMap<String, Instant>,
}

impl WindowGate {
    pub fn new() -> Self {
        Self {
            hits: DashMap::new(),
        }
    }

    /// Returns true when the key is admitted (and the window starts)
    pub fn check(&self, key: &str, window: Duration) -> bool {
        let now = Instant::now();
        let admitted = match self.hits.entry(key.to_string()) {
            Entry::Occupied(mut entry) => {
                if now.duration_since(*entry.get()) >= window {
                    entry.insert(now);
                    true
                } else {
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                true
            }
        };
        trace!(key = %key, admitted, "Window gate checked");
        admitted
    }

    /// Remaining lockout for a key, None when it would be admitted
    pub fn remaining(&self, key: &str, window: Duration) -> Option<Duration> {
        let started = *self.hits.get(key)?;
        window.checked_sub(started.elapsed()).filter(|d| !d.is_zero())
    }
}

impl Default for WindowGate {
    fn default() -> Self {
        Self::new()
    }
}

/// Burst collapser
///
/// Every event for a key calls `settle` with its payload; only the call
/// that is still the latest when the quiet period ends wins and receives
/// the most recent payload. All earlier calls resolve to None.
pub struct Debouncer {
    pending: DashMap<String, (u64, Value)>,
    counter: AtomicU64,
}

impl Debouncer {
    pub fn new() -> Self {
        Self {
            pending: DashMap::new(),
            counter: AtomicU64::new(0),
        }
    }

    pub async fn settle(&self, key: &str, payload: Value, quiet: Duration) -> Option<Value> {
        let generation = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        self.pending.insert(key.to_string(), (generation, payload));

        tokio::time::sleep(quiet).await;

        // Only the generation still stored after the quiet period fires
        let latest = self.pending.get(key)?;
        if latest.0 != generation {
            return None;
        }
        let payload = latest.1.clone();
        drop(latest);
        self.pending.remove(key);
        trace!(key = %key, "Debounce settled");
        Some(payload)
    }
}

impl Default for Debouncer {
    fn default() -> Self {
        Self::new()
    }
}

/// Once-only handler tracking for the process lifetime
pub struct OnceSet {
    fired: DashSet<String>,
}

impl OnceSet {
    pub fn new() -> Self {
        Self {
            fired: DashSet::new(),
        }
    }

    /// Returns true the first time an id is marked
    pub fn mark(&self, id: &str) -> bool {
        self.fired.insert(id.to_string())
    }
}

impl Default for OnceSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_window_admits_then_refuses() {
        let gate = WindowGate::new();
        let window = Duration::from_secs(60);

        assert!(gate.check("rank:user:u1", window));
        assert!(!gate.check("rank:user:u1", window));
        // Different key is independent
        assert!(gate.check("rank:user:u2", window));
    }

    #[tokio::test]
    async fn test_window_reopens_after_elapsing() {
        let gate = WindowGate::new();
        let window = Duration::from_millis(30);

        assert!(gate.check("k", window));
        assert!(!gate.check("k", window));
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(gate.check("k", window));
    }

    #[tokio::test]
    async fn test_refused_hit_does_not_refresh_window() {
        let gate = WindowGate::new();
        let window = Duration::from_millis(50);

        assert!(gate.check("k", window));
        tokio::time::sleep(Duration::from_millis(30)).await;
        // Refused, but must not push the window out
        assert!(!gate.check("k", window));
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(gate.check("k", window));
    }

    #[tokio::test]
    async fn test_debounce_collapses_burst_to_latest() {
        let debouncer = std::sync::Arc::new(Debouncer::new());
        let quiet = Duration::from_millis(30);

        let mut tasks = Vec::new();
        for n in 1..=5 {
            let debouncer = debouncer.clone();
            tasks.push(tokio::spawn(async move {
                // Stagger the burst inside the quiet window
                tokio::time::sleep(Duration::from_millis(n * 2)).await;
                debouncer.settle("key", json!({"n": n}), quiet).await
            }));
        }

        let mut fired = Vec::new();
        for task in tasks {
            if let Some(payload) = task.await.unwrap() {
                fired.push(payload);
            }
        }

        assert_eq!(fired.len(), 1);
        assert_eq!(fired[0]["n"], 5);
    }

    #[tokio::test]
    async fn test_debounce_keys_independent() {
        let debouncer = Debouncer::new();
        let quiet = Duration::from_millis(10);

        let a = debouncer.settle("a", json!(1), quiet).await;
        let b = debouncer.settle("b", json!(2), quiet).await;
        assert_eq!(a, Some(json!(1)));
        assert_eq!(b, Some(json!(2)));
    }

    #[test]
    fn test_once_marks_exactly_once() {
        let once = OnceSet::new();
        assert!(once.mark("welcome"));
        assert!(!once.mark("welcome"));
        assert!(once.mark("other"));
    }
}
