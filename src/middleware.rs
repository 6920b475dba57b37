//! Host integration: per-route limiters and a tower layer over `http` services.
//!
//! A [`RateLimiter`] holds the process defaults and one shared engine. Each
//! route is registered once with [`RateLimiter::route`], which merges and
//! validates its settings and returns a [`RouteLimiter`]. A route limiter
//! exposes the two hooks a host pipeline needs:
//!
//! - [`RouteLimiter::check`] before the handler runs
//! - [`RouteLimiter::annotate`] after it has produced a response
//!
//! [`RateLimitLayer`] wires both hooks around any tower service.
//!
//! ```rust
//! use std::convert::Infallible;
//! use std::time::Duration;
//! use http::{Request, Response};
//! use tower::{Layer, ServiceExt};
//! use windowkeeper::config::{LimitSettings, RouteOverride};
//! use windowkeeper::middleware::{RateLimitLayer, RateLimiter};
//! use windowkeeper::store::InMemoryWindowStore;
//!
//! # #[tokio::main]
//! # async fn main() {
//! let limiter = RateLimiter::new(LimitSettings::default(), InMemoryWindowStore::new());
//! let login = limiter.route(&RouteOverride::enabled().limit(5).ttl(Duration::from_secs(60))).unwrap();
//!
//! let handler = tower::service_fn(|_req: Request<String>| async {
//!     Ok::<_, Infallible>(Response::new(String::from("welcome")))
//! });
//! let svc = RateLimitLayer::new(login).layer(handler);
//!
//! let response = svc.oneshot(Request::new(String::new())).await.unwrap();
//! assert_eq!(response.headers()["x-rate-limit-remaining"], "4");
//! # }
//! ```

use http::request::Parts;
use http::{Request, Response};
use std::collections::BTreeMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

use crate::annotate;
use crate::clock::Clock;
use crate::config::{merge, LimitConfig, LimitSettings, RouteOverride};
use crate::engine::{LimiterEngine, Verdict};
use crate::error::{ConfigError, LimiterError, StoreError};
use crate::store::{WindowKey, WindowStore};
use crate::telemetry::{NullSink, TelemetrySink};

/// Per-request limiter state: derived key, effective config and verdict.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub key: WindowKey,
    pub config: Arc<LimitConfig>,
    pub verdict: Verdict,
}

impl RequestContext {
    /// Stamp this request's verdict onto its response.
    pub fn annotate<B>(&self, response: &mut Response<B>) {
        annotate::annotate(response, &self.verdict);
    }
}

/// Process-wide limiter: defaults plus the engine every route shares.
#[derive(Debug)]
pub struct RateLimiter<S, T = NullSink> {
    defaults: LimitSettings,
    engine: Arc<LimiterEngine<S, T>>,
}

impl<S, T> Clone for RateLimiter<S, T> {
    fn clone(&self) -> Self {
        Self { defaults: self.defaults.clone(), engine: self.engine.clone() }
    }
}

impl<S> RateLimiter<S>
where
    S: WindowStore,
{
    pub fn new(defaults: LimitSettings, store: S) -> Self {
        Self::with_engine(defaults, LimiterEngine::new(store))
    }
}

impl<S, T> RateLimiter<S, T>
where
    S: WindowStore,
    T: TelemetrySink,
    T::Future: Send + 'static,
{
    /// Build on a preconfigured engine (custom clock or sink).
    pub fn with_engine(defaults: LimitSettings, engine: LimiterEngine<S, T>) -> Self {
        Self { defaults, engine: Arc::new(engine) }
    }

    /// Build with a specific clock and sink.
    pub fn with_clock_and_sink<C>(defaults: LimitSettings, store: S, clock: C, sink: T) -> Self
    where
        C: Clock + 'static,
    {
        Self::with_engine(defaults, LimiterEngine::new(store).with_clock(clock).with_sink(sink))
    }

    pub fn defaults(&self) -> &LimitSettings {
        &self.defaults
    }

    pub fn engine(&self) -> &LimiterEngine<S, T> {
        &self.engine
    }

    /// Register one route. Disabled routes never reach the engine; enabled
    /// routes are merged with the defaults and validated here, once.
    pub fn route(&self, settings: &RouteOverride) -> Result<RouteLimiter<S, T>, ConfigError> {
        if !settings.enable {
            return Ok(RouteLimiter { engine: self.engine.clone(), config: None });
        }

        let config = LimitConfig::try_from(merge(&self.defaults, settings))?;
        tracing::info!(
            limit = config.limit(),
            ttl_ms = u64::try_from(config.ttl().as_millis()).unwrap_or(u64::MAX),
            segment = config.segment(),
            "rate limited route registered"
        );
        Ok(RouteLimiter { engine: self.engine.clone(), config: Some(Arc::new(config)) })
    }

    /// Register a whole route table; any invalid route fails the lot.
    pub fn routes(
        &self,
        table: &BTreeMap<String, RouteOverride>,
    ) -> Result<BTreeMap<String, RouteLimiter<S, T>>, ConfigError> {
        table
            .iter()
            .map(|(name, settings)| match self.route(settings) {
                Ok(limiter) => Ok((name.clone(), limiter)),
                Err(e) => {
                    tracing::error!(route = %name, error = %e, "invalid rate limit settings");
                    Err(e)
                }
            })
            .collect()
    }
}

/// Limiter bound to a single route's effective configuration.
#[derive(Debug)]
pub struct RouteLimiter<S, T = NullSink> {
    engine: Arc<LimiterEngine<S, T>>,
    config: Option<Arc<LimitConfig>>,
}

impl<S, T> Clone for RouteLimiter<S, T> {
    fn clone(&self) -> Self {
        Self { engine: self.engine.clone(), config: self.config.clone() }
    }
}

impl<S, T> RouteLimiter<S, T>
where
    S: WindowStore,
    T: TelemetrySink,
    T::Future: Send + 'static,
{
    /// Whether this route is limited at all.
    pub fn is_enabled(&self) -> bool {
        self.config.is_some()
    }

    /// Effective config, if enabled.
    pub fn config(&self) -> Option<&LimitConfig> {
        self.config.as_deref()
    }

    /// Pre-handler hook. `Ok(None)` means the route is not limited and the
    /// request proceeds untouched; otherwise the context carries the verdict.
    pub async fn check(&self, parts: &Parts) -> Result<Option<RequestContext>, StoreError> {
        let config = match &self.config {
            Some(config) => config.clone(),
            None => return Ok(None),
        };

        let key = WindowKey::new(config.segment(), config.key_generator().generate_key(parts));
        let verdict = self.engine.decide(&key, &config).await?;
        Ok(Some(RequestContext { key, config, verdict }))
    }

    /// Post-handler hook. No-op for requests that bypassed the limiter.
    pub fn annotate<B>(&self, response: &mut Response<B>, context: Option<&RequestContext>) {
        if let Some(context) = context {
            context.annotate(response);
        }
    }
}

/// A layer that enforces one route's limit.
#[derive(Debug)]
pub struct RateLimitLayer<S, T = NullSink> {
    route: RouteLimiter<S, T>,
}

impl<S, T> Clone for RateLimitLayer<S, T> {
    fn clone(&self) -> Self {
        Self { route: self.route.clone() }
    }
}

impl<S, T> RateLimitLayer<S, T> {
    pub fn new(route: RouteLimiter<S, T>) -> Self {
        Self { route }
    }
}

impl<Inner, S, T> Layer<Inner> for RateLimitLayer<S, T> {
    type Service = RateLimitService<Inner, S, T>;

    fn layer(&self, inner: Inner) -> Self::Service {
        RateLimitService { inner, route: self.route.clone() }
    }
}

/// Middleware service produced by [`RateLimitLayer`].
///
/// Rejected requests are answered with a 429 without calling the inner
/// service. Store failures are returned as [`LimiterError::Store`]; rendering
/// them is up to the host.
#[derive(Debug)]
pub struct RateLimitService<Inner, S, T = NullSink> {
    inner: Inner,
    route: RouteLimiter<S, T>,
}

impl<Inner: Clone, S, T> Clone for RateLimitService<Inner, S, T> {
    fn clone(&self) -> Self {
        Self { inner: self.inner.clone(), route: self.route.clone() }
    }
}

impl<Inner, S, T, ReqBody, ResBody> Service<Request<ReqBody>> for RateLimitService<Inner, S, T>
where
    Inner: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    Inner::Future: Send + 'static,
    Inner::Error: Send + 'static,
    S: WindowStore + 'static,
    T: TelemetrySink,
    T::Future: Send + 'static,
    ReqBody: Send + 'static,
    ResBody: From<String> + Send + 'static,
{
    type Response = Response<ResBody>;
    type Error = LimiterError<Inner::Error>;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(LimiterError::Inner)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let route = self.route.clone();
        // Keep the instance that was driven to readiness.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(async move {
            let (parts, body) = req.into_parts();
            let context = route.check(&parts).await.map_err(LimiterError::Store)?;
            let req = Request::from_parts(parts, body);

            match context {
                None => inner.call(req).await.map_err(LimiterError::Inner),
                Some(context) if !context.verdict.is_admitted() => {
                    Ok(annotate::rejection_response(&context.verdict))
                }
                Some(context) => {
                    let mut response = inner.call(req).await.map_err(LimiterError::Inner)?;
                    route.annotate(&mut response, Some(&context));
                    Ok(response)
                }
            }
        })
    }
}
