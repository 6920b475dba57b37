use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::error::{StoreError, StoreOperation};

/// Identifies one window in a store: the limiter's segment plus the derived key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WindowKey {
    segment: String,
    id: String,
}

impl WindowKey {
    pub fn new(segment: impl Into<String>, id: impl Into<String>) -> Self {
        Self { segment: segment.into(), id: id.into() }
    }

    /// Store partition this key lives in.
    pub fn segment(&self) -> &str {
        &self.segment
    }

    /// Key derived from the request.
    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for WindowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.segment, self.id)
    }
}

/// Persisted record for one window.
///
/// `remaining` is signed so stores can hold an exhausted count, although the
/// engine itself never writes a negative value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowState {
    pub remaining: i64,
}

/// A store hit: the state plus how long the window has left to live.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredWindow {
    pub state: WindowState,
    pub ttl_remaining: Duration,
}

/// Expiring key-value capability the limiter engine runs against.
///
/// Implementations own eviction: once a window's TTL elapses, `get` must
/// report a miss. Both calls may suspend; the engine awaits each one before
/// moving on.
#[async_trait]
pub trait WindowStore: Send + Sync {
    /// Fetch a live window, or `None` if absent or expired.
    async fn get(&self, key: &WindowKey) -> Result<Option<StoredWindow>, StoreError>;

    /// Write or overwrite a window, expiring it `ttl` from now.
    async fn set(&self, key: &WindowKey, state: WindowState, ttl: Duration)
        -> Result<(), StoreError>;
}

#[async_trait]
impl<S> WindowStore for Arc<S>
where
    S: WindowStore + ?Sized,
{
    async fn get(&self, key: &WindowKey) -> Result<Option<StoredWindow>, StoreError> {
        (**self).get(key).await
    }

    async fn set(
        &self,
        key: &WindowKey,
        state: WindowState,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        (**self).set(key, state, ttl).await
    }
}

fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

#[derive(Debug, Clone, Copy)]
struct Entry {
    state: WindowState,
    expires_at_millis: u64,
}

/// How often `set` sweeps expired entries unless configured otherwise.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Simple in-memory window store.
///
/// Clones share the same map. Expired entries are dropped lazily on `get`,
/// swept in bulk by `set` at most once per sweep interval, and on demand by
/// [`InMemoryWindowStore::purge_expired`]. Keys that are never read again
/// therefore live at most one TTL plus one sweep interval.
#[derive(Clone, Debug)]
pub struct InMemoryWindowStore {
    data: Arc<Mutex<HashMap<WindowKey, Entry>>>,
    clock: Arc<dyn Clock>,
    sweep_interval_millis: u64,
    next_sweep_at_millis: Arc<AtomicU64>,
}

impl Default for InMemoryWindowStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryWindowStore {
    pub fn new() -> Self {
        Self::with_clock(SystemClock)
    }

    /// Use a specific clock (share it with the engine for deterministic tests).
    pub fn with_clock<C: Clock + 'static>(clock: C) -> Self {
        Self {
            data: Arc::new(Mutex::new(HashMap::new())),
            clock: Arc::new(clock),
            sweep_interval_millis: duration_millis(DEFAULT_SWEEP_INTERVAL),
            next_sweep_at_millis: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Change how often writes sweep expired entries. Zero sweeps on every write.
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_millis = duration_millis(interval);
        self
    }

    /// Claim the next sweep slot if it is due. Only one caller wins per slot.
    fn sweep_due(&self, now: u64) -> bool {
        let next = self.next_sweep_at_millis.load(Ordering::Relaxed);
        now >= next
            && self
                .next_sweep_at_millis
                .compare_exchange(
                    next,
                    now.saturating_add(self.sweep_interval_millis),
                    Ordering::AcqRel,
                    Ordering::Relaxed,
                )
                .is_ok()
    }

    /// Current state of a live window, without its TTL.
    pub fn peek(&self, key: &WindowKey) -> Result<Option<WindowState>, StoreError> {
        let now = self.clock.now_millis();
        let guard = self.data.lock().map_err(|_| StoreError::Poisoned)?;
        Ok(guard.get(key).filter(|e| e.expires_at_millis > now).map(|e| e.state))
    }

    /// Number of entries held, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.data.lock().map(|guard| guard.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every expired entry; returns how many were removed.
    pub fn purge_expired(&self) -> Result<usize, StoreError> {
        let now = self.clock.now_millis();
        let mut guard = self.data.lock().map_err(|_| StoreError::Poisoned)?;
        let before = guard.len();
        guard.retain(|_, e| e.expires_at_millis > now);
        Ok(before - guard.len())
    }
}

#[async_trait]
impl WindowStore for InMemoryWindowStore {
    async fn get(&self, key: &WindowKey) -> Result<Option<StoredWindow>, StoreError> {
        let now = self.clock.now_millis();
        let mut guard = self.data.lock().map_err(|_| StoreError::Poisoned)?;

        match guard.get(key).copied() {
            Some(entry) if entry.expires_at_millis > now => Ok(Some(StoredWindow {
                state: entry.state,
                ttl_remaining: Duration::from_millis(entry.expires_at_millis - now),
            })),
            Some(_) => {
                guard.remove(key);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn set(
        &self,
        key: &WindowKey,
        state: WindowState,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        let now = self.clock.now_millis();
        let expires_at_millis = now.saturating_add(duration_millis(ttl));
        let mut guard = self.data.lock().map_err(|_| StoreError::Poisoned)?;
        if self.sweep_due(now) {
            let before = guard.len();
            guard.retain(|_, e| e.expires_at_millis > now);
            let swept = before - guard.len();
            if swept > 0 {
                tracing::debug!(swept, held = guard.len(), "expired windows swept");
            }
        }
        guard.insert(key.clone(), Entry { state, expires_at_millis });
        Ok(())
    }
}

/// Bounds every operation of an inner store with a deadline.
///
/// A stalled backend otherwise stalls the request forever; with this adapter
/// it surfaces as [`StoreError::Timeout`].
#[derive(Debug, Clone)]
pub struct TimeoutStore<S> {
    inner: S,
    timeout: Duration,
}

impl<S> TimeoutStore<S> {
    /// Wrap `inner`. Panics if `timeout` is zero.
    pub fn new(inner: S, timeout: Duration) -> Self {
        assert!(timeout > Duration::ZERO, "store timeout must be non-zero");
        Self { inner, timeout }
    }

    /// Inspect the configured deadline.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

#[async_trait]
impl<S> WindowStore for TimeoutStore<S>
where
    S: WindowStore,
{
    async fn get(&self, key: &WindowKey) -> Result<Option<StoredWindow>, StoreError> {
        tokio::time::timeout(self.timeout, self.inner.get(key)).await.map_err(|_| {
            StoreError::Timeout { operation: StoreOperation::Get, timeout: self.timeout }
        })?
    }

    async fn set(
        &self,
        key: &WindowKey,
        state: WindowState,
        ttl: Duration,
    ) -> Result<(), StoreError> {
        tokio::time::timeout(self.timeout, self.inner.set(key, state, ttl)).await.map_err(|_| {
            StoreError::Timeout { operation: StoreOperation::Set, timeout: self.timeout }
        })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;

    fn key(id: &str) -> WindowKey {
        WindowKey::new("test", id)
    }

    #[tokio::test]
    async fn miss_then_hit_with_counting_down_ttl() {
        let clock = ManualClock::starting_at(1_000);
        let store = InMemoryWindowStore::with_clock(clock.clone());

        assert!(store.get(&key("a")).await.unwrap().is_none());

        store.set(&key("a"), WindowState { remaining: 4 }, Duration::from_secs(60)).await.unwrap();
        clock.advance(15_000);

        let hit = store.get(&key("a")).await.unwrap().expect("live window");
        assert_eq!(hit.state.remaining, 4);
        assert_eq!(hit.ttl_remaining, Duration::from_millis(45_000));
    }

    #[tokio::test]
    async fn entry_expires_exactly_at_ttl() {
        let clock = ManualClock::starting_at(0);
        let store = InMemoryWindowStore::with_clock(clock.clone());
        store.set(&key("a"), WindowState { remaining: 1 }, Duration::from_millis(100)).await.unwrap();

        clock.advance(99);
        assert!(store.get(&key("a")).await.unwrap().is_some());
        clock.advance(1);
        assert!(store.get(&key("a")).await.unwrap().is_none());
        assert!(store.is_empty(), "expired entry is evicted on read");
    }

    #[tokio::test]
    async fn set_overwrites_and_restarts_expiry() {
        let clock = ManualClock::starting_at(0);
        let store = InMemoryWindowStore::with_clock(clock.clone());
        store.set(&key("a"), WindowState { remaining: 3 }, Duration::from_millis(100)).await.unwrap();
        clock.advance(50);
        store.set(&key("a"), WindowState { remaining: 2 }, Duration::from_millis(100)).await.unwrap();

        let hit = store.get(&key("a")).await.unwrap().unwrap();
        assert_eq!(hit.state.remaining, 2);
        assert_eq!(hit.ttl_remaining, Duration::from_millis(100));
    }

    #[tokio::test]
    async fn segments_partition_keys() {
        let store = InMemoryWindowStore::new();
        let ttl = Duration::from_secs(60);
        store.set(&WindowKey::new("one", "k"), WindowState { remaining: 1 }, ttl).await.unwrap();

        assert!(store.get(&WindowKey::new("two", "k")).await.unwrap().is_none());
        assert_eq!(store.peek(&WindowKey::new("one", "k")).unwrap(), Some(WindowState { remaining: 1 }));
    }

    #[tokio::test]
    async fn purge_drops_only_expired() {
        let clock = ManualClock::starting_at(0);
        let store = InMemoryWindowStore::with_clock(clock.clone());
        store.set(&key("short"), WindowState { remaining: 0 }, Duration::from_millis(10)).await.unwrap();
        store.set(&key("long"), WindowState { remaining: 0 }, Duration::from_millis(1_000)).await.unwrap();
        clock.advance(20);

        assert_eq!(store.purge_expired().unwrap(), 1);
        assert_eq!(store.len(), 1);
        assert!(store.peek(&key("long")).unwrap().is_some());
    }

    #[tokio::test]
    async fn abandoned_windows_are_swept_by_later_writes() {
        use crate::config::LimitConfig;
        use crate::engine::LimiterEngine;

        let clock = ManualClock::starting_at(1_700_000_000_000);
        let store = InMemoryWindowStore::with_clock(clock.clone()).with_sweep_interval(Duration::from_secs(5));
        let engine = LimiterEngine::new(store.clone()).with_clock(clock.clone());
        let config = LimitConfig::new(3, Duration::from_secs(1)).unwrap();

        for round in 0..5 {
            for client in 0..1_000 {
                let key = WindowKey::new("sweep", format!("GET:/:{}.{}", round, client));
                assert!(engine.decide(&key, &config).await.unwrap().admitted);
            }
            assert!(store.len() <= 1_000, "round {} holds {}", round, store.len());
            clock.advance(10_000);
        }

        // one more write after the last expiry clears everything but itself
        engine.decide(&WindowKey::new("sweep", "late"), &config).await.unwrap();
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn sweeps_are_rate_limited_by_interval() {
        let clock = ManualClock::starting_at(0);
        let store = InMemoryWindowStore::with_clock(clock.clone()).with_sweep_interval(Duration::from_secs(60));
        let ttl = Duration::from_millis(10);

        store.set(&key("a"), WindowState { remaining: 0 }, ttl).await.unwrap();
        clock.advance(20);
        store.set(&key("b"), WindowState { remaining: 0 }, ttl).await.unwrap();
        assert_eq!(store.len(), 2, "no sweep before the interval elapses");

        clock.advance(60_000);
        store.set(&key("c"), WindowState { remaining: 0 }, ttl).await.unwrap();
        assert_eq!(store.len(), 1);
        assert!(store.peek(&key("c")).unwrap().is_some());
    }

    #[test]
    fn window_key_display() {
        assert_eq!(WindowKey::new("windowkeeper", "GET:/:1.2.3.4").to_string(), "windowkeeper:GET:/:1.2.3.4");
    }

    #[derive(Debug)]
    struct Hangs;

    #[async_trait]
    impl WindowStore for Hangs {
        async fn get(&self, _key: &WindowKey) -> Result<Option<StoredWindow>, StoreError> {
            std::future::pending().await
        }

        async fn set(&self, _: &WindowKey, _: WindowState, _: Duration) -> Result<(), StoreError> {
            std::future::pending().await
        }
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_store_bounds_stalled_backend() {
        let store = TimeoutStore::new(Hangs, Duration::from_millis(50));

        let err = store.get(&key("a")).await.unwrap_err();
        assert!(matches!(err, StoreError::Timeout { operation: StoreOperation::Get, .. }));

        let err = store.set(&key("a"), WindowState { remaining: 1 }, Duration::from_secs(1)).await.unwrap_err();
        assert!(matches!(err, StoreError::Timeout { operation: StoreOperation::Set, .. }));
    }

    #[tokio::test]
    async fn timeout_store_passes_results_through() {
        let store = TimeoutStore::new(InMemoryWindowStore::new(), Duration::from_secs(1));
        store.set(&key("a"), WindowState { remaining: 7 }, Duration::from_secs(60)).await.unwrap();
        let hit = store.get(&key("a")).await.unwrap().unwrap();
        assert_eq!(hit.state.remaining, 7);
    }
}
