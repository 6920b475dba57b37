//! Convenient re-exports for common windowkeeper types.
pub use crate::{
    annotate::{X_RATE_LIMIT_LIMIT, X_RATE_LIMIT_REMAINING, X_RATE_LIMIT_RESET},
    config::{LimitConfig, LimitSettings, LimiterConfig, RouteOverride},
    engine::{LimiterEngine, Verdict},
    error::{ConfigError, LimiterError, StoreError},
    key::{DefaultKeyGenerator, KeyGenerator, RemoteAddr},
    middleware::{RateLimitLayer, RateLimiter, RouteLimiter},
    store::{InMemoryWindowStore, WindowStore},
    telemetry::{LimiterEvent, LogSink, MemorySink, NullSink},
};
