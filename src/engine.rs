//! Fixed-window decision engine.
//!
//! For each key the engine keeps one window in the [`WindowStore`]:
//!
//! - no live window: open one with `limit - 1` remaining and the configured
//!   TTL, admit
//! - live window, quota left: store `remaining - 1` with the window's *own*
//!   remaining TTL (a window is never extended), admit
//! - live window, quota gone: reject without writing
//!
//! Every verdict inside one window therefore reports the same reset instant.
//! The reject path does not write to the store: an exhausted
//! window stays pinned at its last non-negative count and each later request
//! re-derives the rejection until the store evicts the window.
//!
//! The engine holds no state of its own and takes no locks. Two concurrent
//! decisions for one key may read the same count before either writes it back,
//! so a window can admit more than `limit` requests under contention.

use std::sync::Arc;
use std::time::Duration;

use crate::clock::{Clock, SystemClock};
use crate::config::LimitConfig;
use crate::error::StoreError;
use crate::store::{StoredWindow, WindowKey, WindowState, WindowStore};
use crate::telemetry::{emit_best_effort, LimiterEvent, NullSink, TelemetrySink};

/// Outcome of one decision, with the metadata that goes on the response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Verdict {
    /// Whether the request may proceed.
    pub admitted: bool,
    /// Configured max admits per window.
    pub limit: u64,
    /// Quota left after this request; 0 on rejection.
    pub remaining: u64,
    /// Epoch milliseconds at which the window expires.
    pub reset_at_millis: u64,
}

impl Verdict {
    pub fn is_admitted(&self) -> bool {
        self.admitted
    }
}

fn duration_millis(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

/// The admit/reject algorithm over an injected window store.
#[derive(Debug)]
pub struct LimiterEngine<S, T = NullSink> {
    store: S,
    clock: Arc<dyn Clock>,
    sink: T,
}

impl<S> LimiterEngine<S>
where
    S: WindowStore,
{
    /// Engine on the system clock with telemetry discarded.
    pub fn new(store: S) -> Self {
        Self { store, clock: Arc::new(SystemClock), sink: NullSink }
    }
}

impl<S, T> LimiterEngine<S, T>
where
    S: WindowStore,
    T: TelemetrySink,
    T::Future: Send + 'static,
{
    /// Override the clock (share it with the store in tests).
    pub fn with_clock<C: Clock + 'static>(mut self, clock: C) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Send decision events to `sink`.
    pub fn with_sink<U>(self, sink: U) -> LimiterEngine<S, U>
    where
        U: TelemetrySink,
    {
        LimiterEngine { store: self.store, clock: self.clock, sink }
    }

    /// The backing store.
    pub fn store(&self) -> &S {
        &self.store
    }

    /// Decide whether one more request fits in `key`'s window.
    ///
    /// Store failures abort the decision and are returned unchanged.
    pub async fn decide(&self, key: &WindowKey, config: &LimitConfig) -> Result<Verdict, StoreError> {
        match self.try_decide(key, config).await {
            Ok(verdict) => Ok(verdict),
            Err(e) => {
                tracing::error!(key = %key, error = %e, "window store failed");
                self.emit(LimiterEvent::StoreFailed { key: key.to_string(), error: e.to_string() })
                    .await;
                Err(e)
            }
        }
    }

    async fn try_decide(&self, key: &WindowKey, config: &LimitConfig) -> Result<Verdict, StoreError> {
        let limit = config.limit();
        let existing = self.store.get(key).await?;
        let now = self.clock.now_millis();

        let StoredWindow { state, ttl_remaining } = match existing {
            Some(window) => window,
            None => {
                let remaining = limit - 1;
                let state = WindowState { remaining: i64::try_from(remaining).unwrap_or(i64::MAX) };
                self.store.set(key, state, config.ttl()).await?;

                let verdict = Verdict {
                    admitted: true,
                    limit,
                    remaining,
                    reset_at_millis: now.saturating_add(duration_millis(config.ttl())),
                };
                tracing::debug!(key = %key, limit, remaining, "window opened");
                self.emit(LimiterEvent::WindowOpened { key: key.to_string(), limit, ttl: config.ttl() })
                    .await;
                return Ok(verdict);
            }
        };

        let reset_at_millis = now.saturating_add(duration_millis(ttl_remaining));
        let candidate = state.remaining.saturating_sub(1);

        if candidate < 0 {
            tracing::warn!(key = %key, limit, reset_at_millis, "rate limit exceeded");
            self.emit(LimiterEvent::Rejected { key: key.to_string(), limit, reset_at_millis }).await;
            return Ok(Verdict { admitted: false, limit, remaining: 0, reset_at_millis });
        }

        self.store.set(key, WindowState { remaining: candidate }, ttl_remaining).await?;

        let remaining = u64::try_from(candidate).unwrap_or(0);
        tracing::debug!(key = %key, limit, remaining, "request admitted");
        self.emit(LimiterEvent::Admitted { key: key.to_string(), limit, remaining }).await;
        Ok(Verdict { admitted: true, limit, remaining, reset_at_millis })
    }

    async fn emit(&self, event: LimiterEvent) {
        emit_best_effort(self.sink.clone(), event).await;
    }
}
