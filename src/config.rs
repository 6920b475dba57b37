//! Limiter configuration: process-wide defaults, per-route overrides, and the
//! validated configuration a route actually runs with.
//!
//! Merging is explicit and side-effect free: [`merge`] takes the defaults and
//! one override and returns new settings, where every field the override sets
//! wins and every field it leaves out is inherited. Validation happens once,
//! when a route is registered, via `LimitConfig::try_from`.
//!
//! Settings can be loaded from JSON. Durations are written in milliseconds:
//!
//! ```json
//! {
//!   "defaults": { "limit": 100, "ttl_ms": 60000, "segment": "api" },
//!   "routes": {
//!     "/login": { "enable": true, "limit": 5 },
//!     "/health": { "enable": false }
//!   }
//! }
//! ```

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use crate::error::ConfigError;
use crate::key::{DefaultKeyGenerator, KeyGenerator};

/// Default maximum admits per window.
pub const DEFAULT_LIMIT: u64 = 15;
/// Default window lifetime (15 minutes).
pub const DEFAULT_TTL: Duration = Duration::from_millis(15 * 60 * 1000);
/// Default store partition.
pub const DEFAULT_SEGMENT: &str = "windowkeeper";

fn default_limit() -> u64 {
    DEFAULT_LIMIT
}

fn default_ttl() -> Duration {
    DEFAULT_TTL
}

fn default_segment() -> String {
    DEFAULT_SEGMENT.to_string()
}

fn default_key_generator() -> Option<Arc<dyn KeyGenerator>> {
    Some(Arc::new(DefaultKeyGenerator))
}

/// Process-wide limiter settings. Not validated until merged into a route.
#[derive(Clone, Serialize, Deserialize)]
pub struct LimitSettings {
    /// Max admits per window
    #[serde(default = "default_limit")]
    pub limit: u64,

    /// Window lifetime
    #[serde(default = "default_ttl", rename = "ttl_ms", with = "duration_millis")]
    pub ttl: Duration,

    /// Store partition for this limiter's keys
    #[serde(default = "default_segment")]
    pub segment: String,

    /// Key derivation strategy; code-only
    #[serde(skip, default = "default_key_generator")]
    pub key_generator: Option<Arc<dyn KeyGenerator>>,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            limit: default_limit(),
            ttl: default_ttl(),
            segment: default_segment(),
            key_generator: default_key_generator(),
        }
    }
}

impl fmt::Debug for LimitSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LimitSettings")
            .field("limit", &self.limit)
            .field("ttl", &self.ttl)
            .field("segment", &self.segment)
            .field("key_generator", &self.key_generator.as_ref().map(|_| "<strategy>"))
            .finish()
    }
}

impl LimitSettings {
    pub fn with_limit(mut self, limit: u64) -> Self {
        self.limit = limit;
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    pub fn with_segment(mut self, segment: impl Into<String>) -> Self {
        self.segment = segment.into();
        self
    }

    pub fn with_key_generator<K: KeyGenerator + 'static>(mut self, generator: K) -> Self {
        self.key_generator = Some(Arc::new(generator));
        self
    }
}

/// Per-route settings. Unset fields inherit from [`LimitSettings`].
///
/// Routes are not limited unless `enable` is true.
#[derive(Clone, Default, Serialize, Deserialize)]
pub struct RouteOverride {
    #[serde(default)]
    pub enable: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u64>,

    #[serde(
        default,
        rename = "ttl_ms",
        with = "option_duration_millis",
        skip_serializing_if = "Option::is_none"
    )]
    pub ttl: Option<Duration>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub segment: Option<String>,

    #[serde(skip)]
    pub key_generator: Option<Arc<dyn KeyGenerator>>,
}

impl fmt::Debug for RouteOverride {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RouteOverride")
            .field("enable", &self.enable)
            .field("limit", &self.limit)
            .field("ttl", &self.ttl)
            .field("segment", &self.segment)
            .field("key_generator", &self.key_generator.as_ref().map(|_| "<strategy>"))
            .finish()
    }
}

impl RouteOverride {
    /// Limiting enabled, everything else inherited.
    pub fn enabled() -> Self {
        Self { enable: true, ..Self::default() }
    }

    /// Limiting disabled; the route never reaches the engine.
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    pub fn segment(mut self, segment: impl Into<String>) -> Self {
        self.segment = Some(segment.into());
        self
    }

    pub fn key_generator<K: KeyGenerator + 'static>(mut self, generator: K) -> Self {
        self.key_generator = Some(Arc::new(generator));
        self
    }
}

/// Merge an override onto defaults. Override fields win.
///
/// The `enable` flag is not part of the result: it decides whether a route is
/// limited at all and is read by the caller before merging matters.
pub fn merge(defaults: &LimitSettings, route: &RouteOverride) -> LimitSettings {
    LimitSettings {
        limit: route.limit.unwrap_or(defaults.limit),
        ttl: route.ttl.unwrap_or(defaults.ttl),
        segment: route.segment.clone().unwrap_or_else(|| defaults.segment.clone()),
        key_generator: route.key_generator.clone().or_else(|| defaults.key_generator.clone()),
    }
}

/// Validated, immutable configuration for one limited route.
#[derive(Clone)]
pub struct LimitConfig {
    limit: u64,
    ttl: Duration,
    segment: String,
    key_generator: Arc<dyn KeyGenerator>,
}

impl LimitConfig {
    /// Build and validate directly.
    pub fn new(limit: u64, ttl: Duration) -> Result<Self, ConfigError> {
        Self::try_from(LimitSettings::default().with_limit(limit).with_ttl(ttl))
    }

    /// Max admits per window.
    pub fn limit(&self) -> u64 {
        self.limit
    }

    /// Window lifetime.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Store partition.
    pub fn segment(&self) -> &str {
        &self.segment
    }

    /// Key derivation strategy.
    pub fn key_generator(&self) -> &dyn KeyGenerator {
        self.key_generator.as_ref()
    }
}

impl TryFrom<LimitSettings> for LimitConfig {
    type Error = ConfigError;

    fn try_from(settings: LimitSettings) -> Result<Self, Self::Error> {
        if settings.limit == 0 {
            return Err(ConfigError::InvalidLimit { provided: settings.limit });
        }
        // Windows are tracked at millisecond granularity.
        if settings.ttl.as_millis() == 0 {
            return Err(ConfigError::InvalidTtl(settings.ttl));
        }
        if settings.segment.is_empty() {
            return Err(ConfigError::EmptySegment);
        }
        let key_generator = settings.key_generator.ok_or(ConfigError::MissingKeyGenerator)?;

        Ok(Self { limit: settings.limit, ttl: settings.ttl, segment: settings.segment, key_generator })
    }
}

impl fmt::Debug for LimitConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LimitConfig")
            .field("limit", &self.limit)
            .field("ttl", &self.ttl)
            .field("segment", &self.segment)
            .finish_non_exhaustive()
    }
}

/// A settings document: defaults plus overrides keyed by route name.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LimiterConfig {
    #[serde(default)]
    pub defaults: LimitSettings,

    #[serde(default)]
    pub routes: BTreeMap<String, RouteOverride>,
}

impl LimiterConfig {
    /// Parse a JSON settings document.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Load a JSON settings document from disk.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_json_str(&contents)
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(
        value: &Option<Duration>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => serializer.serialize_some(&u64::try_from(d.as_millis()).unwrap_or(u64::MAX)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(deserializer).map(|ms| ms.map(Duration::from_millis))
    }
}
