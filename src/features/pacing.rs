//! Per-key pacing / debouncing.
//!
//! Remembers when each key last fired and tells callers how long to wait
//! before the next one. Time comes from an injected [`Clock`] so tests can
//! drive it by hand.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

pub trait Clock: Send + Sync {
    /// Monotonic milliseconds.
    fn now_ms(&self) -> u64;
}

/// Wall clock anchored at construction.
pub struct SystemClock {
    origin: std::time::Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: std::time::Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }
}

/// Hand-driven clock. Clones share the same time.
#[derive(Default, Clone)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn at(ms: u64) -> Self {
        Self {
            now: Arc::new(AtomicU64::new(ms)),
        }
    }

    pub fn advance(&self, by: Duration) {
        self.now
            .fetch_add(by.as_millis() as u64, Ordering::Relaxed);
    }
}

impl Clock for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now.load(Ordering::Relaxed)
    }
}

pub struct PacingStore<C: Clock = SystemClock> {
    clock: C,
    last_seen: Mutex<HashMap<String, u64>>,
}

impl PacingStore<SystemClock> {
    pub fn system() -> Self {
        Self::new(SystemClock::new())
    }
}

impl<C: Clock> PacingStore<C> {
    pub fn new(clock: C) -> Self {
        Self {
            clock,
            last_seen: Mutex::new(HashMap::new()),
        }
    }

    pub fn clock(&self) -> &C {
        &self.clock
    }

    /// Composite key, e.g. `("fanout", channel_id)`.
    pub fn key(scope: &str, id: &str) -> String {
        format!("{}:{}", scope, id)
    }

    /// Time still to wait before `key` may fire again. Zero for unseen keys.
    pub fn remaining(&self, key: &str, interval: Duration) -> Duration {
        let now = self.clock.now_ms();
        let last = self
            .last_seen
            .lock()
            .map(|m| m.get(key).copied())
            .unwrap_or(None);
        match last {
            Some(t) => {
                let elapsed = now.saturating_sub(t);
                Duration::from_millis((interval.as_millis() as u64).saturating_sub(elapsed))
            }
            None => Duration::ZERO,
        }
    }

    pub fn mark(&self, key: &str) {
        let now = self.clock.now_ms();
        if let Ok(mut m) = self.last_seen.lock() {
            m.insert(key.to_string(), now);
        }
    }

    /// `true` and marks the key when the interval has passed; `false` otherwise.
    pub fn try_fire(&self, key: &str, interval: Duration) -> bool {
        if self.remaining(key, interval).is_zero() {
            self.mark(key);
            true
        } else {
            false
        }
    }

    /// Sleep out the remaining interval without marking. Callers whose work
    /// takes time mark once it is done, so the gap counts from its end.
    pub async fn wait_clear(&self, key: &str, interval: Duration) {
        let wait = self.remaining(key, interval);
        if !wait.is_zero() {
            info!("pacing: waiting {}ms before {}", wait.as_millis(), key);
            tokio::time::sleep(wait).await;
        }
    }

    /// Sleep out the remaining interval, then mark.
    pub async fn wait_turn(&self, key: &str, interval: Duration) {
        self.wait_clear(key, interval).await;
        self.mark(key);
    }

    pub fn forget(&self, key: &str) {
        if let Ok(mut m) = self.last_seen.lock() {
            m.remove(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unseen_key_fires_immediately() {
        let store = PacingStore::new(ManualClock::at(1_000));
        assert_eq!(store.remaining("a", Duration::from_secs(2)), Duration::ZERO);
        assert!(store.try_fire("a", Duration::from_secs(2)));
    }

    #[test]
    fn test_interval_enforced_with_fake_clock() {
        let store = PacingStore::new(ManualClock::at(0));
        store.mark("fanout:1");
        store.clock().advance(Duration::from_millis(700));
        assert_eq!(
            store.remaining("fanout:1", Duration::from_millis(2_500)),
            Duration::from_millis(1_800)
        );
        assert!(!store.try_fire("fanout:1", Duration::from_millis(2_500)));
        store.clock().advance(Duration::from_millis(1_800));
        assert!(store.try_fire("fanout:1", Duration::from_millis(2_500)));
    }

    #[test]
    fn test_keys_are_independent() {
        let store = PacingStore::new(ManualClock::at(0));
        store.mark(&PacingStore::<ManualClock>::key("fanout", "zh"));
        assert!(store.try_fire("fanout:general", Duration::from_secs(10)));
        store.forget("fanout:zh");
        assert!(store.try_fire("fanout:zh", Duration::from_secs(10)));
    }

    #[tokio::test]
    async fn test_wait_turn_marks_key() {
        let store = PacingStore::new(ManualClock::at(5));
        store.wait_turn("k", Duration::from_millis(1)).await;
        assert_eq!(store.remaining("k", Duration::from_millis(50)), Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_wait_clear_leaves_key_unmarked() {
        let store = PacingStore::new(ManualClock::at(0));
        store.wait_clear("k", Duration::from_millis(50)).await;
        assert_eq!(store.remaining("k", Duration::from_millis(50)), Duration::ZERO);
    }

    #[test]
    fn test_manual_clock_clones_share_time() {
        let clock = ManualClock::at(10);
        let store = PacingStore::new(clock.clone());
        clock.advance(Duration::from_millis(90));
        assert_eq!(store.clock().now_ms(), 100);
    }
}
