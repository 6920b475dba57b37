#![forbid(unsafe_code)]
#![deny(warnings)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # windowkeeper
//!
//! Per-client fixed-window rate limiting for `http`/`tower` services.
//!
//! Every request on a limited route is mapped to a key (by default
//! `METHOD:path:client`) and counted against that key's current window in an
//! expiring key-value store. The first request opens a window with `limit - 1`
//! remaining; later requests count down until the quota is gone, after which
//! requests are answered with `429 Too Many Requests` until the window's TTL
//! elapses. Every limited response carries `X-Rate-Limit-Limit`,
//! `X-Rate-Limit-Remaining` and `X-Rate-Limit-Reset` (epoch milliseconds).
//!
//! ## Pieces
//!
//! - [`key`]: pluggable key derivation
//! - [`store`]: the [`WindowStore`] capability and an in-memory implementation
//! - [`engine`]: the admit/reject algorithm
//! - [`annotate`]: response headers and the 429 body
//! - [`middleware`]: per-route registration and a tower layer
//! - [`config`]: defaults, per-route overrides, JSON settings
//! - [`telemetry`]: decision events and sinks
//!
//! The engine is not linearizable: concurrent requests for one key can both
//! read the same count, so a window may briefly admit more than `limit`.

pub mod annotate;
pub mod clock;
pub mod config;
pub mod engine;
pub mod error;
pub mod key;
pub mod middleware;
pub mod prelude;
pub mod store;
pub mod telemetry;

// Re-exports
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{LimitConfig, LimitSettings, LimiterConfig, RouteOverride};
pub use engine::{LimiterEngine, Verdict};
pub use error::{ConfigError, LimiterError, StoreError};
pub use key::{DefaultKeyGenerator, KeyGenerator, RemoteAddr};
pub use middleware::{RateLimitLayer, RateLimitService, RateLimiter, RequestContext, RouteLimiter};
pub use store::{InMemoryWindowStore, TimeoutStore, WindowKey, WindowState, WindowStore};
