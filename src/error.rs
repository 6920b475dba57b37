//! Error types for the limiter, its stores and its configuration
use std::fmt;
use std::time::Duration;

/// A backing store failed while the engine was reading or writing a window.
///
/// The engine never retries and never converts these into an admit or reject;
/// they propagate to whoever called it.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),
    /// A store operation did not finish in time.
    #[error("store {operation} timed out after {timeout:?}")]
    Timeout { operation: StoreOperation, timeout: Duration },
    /// A lock guarding in-process state was poisoned by a panicking writer.
    #[error("store state poisoned")]
    Poisoned,
    /// Any other backend failure.
    #[error("store backend error: {0}")]
    Backend(#[source] Box<dyn std::error::Error + Send + Sync>),
}

impl StoreError {
    /// Wrap an arbitrary backend error.
    pub fn backend<E>(err: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        StoreError::Backend(Box::new(err))
    }
}

/// Which store call failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreOperation {
    Get,
    Set,
}

impl fmt::Display for StoreOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StoreOperation::Get => write!(f, "get"),
            StoreOperation::Set => write!(f, "set"),
        }
    }
}

/// Invalid limiter configuration, detected when a route is registered.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Limit must be > 0.
    #[error("limit must be > 0 (got {provided})")]
    InvalidLimit { provided: u64 },
    /// Window TTL must be > 0.
    #[error("ttl must be > 0 (got {0:?})")]
    InvalidTtl(Duration),
    /// Keys need a non-empty store partition.
    #[error("segment must not be empty")]
    EmptySegment,
    /// No key generation strategy is configured.
    #[error("no key generator configured")]
    MissingKeyGenerator,
    /// A settings document could not be parsed.
    #[error("invalid settings document: {0}")]
    Parse(String),
    /// A settings file could not be read.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Error returned by the rate limit middleware service.
#[derive(Debug)]
pub enum LimiterError<E> {
    /// The window store failed; the inner service was not called.
    Store(StoreError),
    /// The wrapped service failed.
    Inner(E),
}

impl<E: fmt::Display> fmt::Display for LimiterError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Store(e) => write!(f, "rate limiter store failure: {e}"),
            Self::Inner(e) => write!(f, "{e}"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for LimiterError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::Inner(e) => Some(e),
        }
    }
}

impl<E> LimiterError<E> {
    /// Check if the store failed.
    pub fn is_store(&self) -> bool {
        matches!(self, Self::Store(_))
    }
    /// Check if this error wraps an inner error.
    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }
    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            _ => None,
        }
    }
    /// Borrow the store error if present.
    pub fn as_store(&self) -> Option<&StoreError> {
        match self {
            Self::Store(e) => Some(e),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::io;

    #[test]
    fn store_timeout_display_names_operation() {
        let err = StoreError::Timeout {
            operation: StoreOperation::Set,
            timeout: Duration::from_millis(250),
        };
        let msg = err.to_string();
        assert!(msg.contains("set"));
        assert!(msg.contains("250ms"));
    }

    #[test]
    fn backend_error_keeps_source() {
        let err = StoreError::backend(io::Error::new(io::ErrorKind::ConnectionRefused, "refused"));
        assert!(err.to_string().contains("refused"));
        assert!(err.source().is_some());
    }

    #[test]
    fn config_error_display() {
        assert_eq!(
            ConfigError::InvalidLimit { provided: 0 }.to_string(),
            "limit must be > 0 (got 0)"
        );
        assert!(ConfigError::InvalidTtl(Duration::ZERO).to_string().contains("ttl"));
    }

    #[test]
    fn limiter_error_predicates_and_accessors() {
        let store: LimiterError<io::Error> = LimiterError::Store(StoreError::Poisoned);
        assert!(store.is_store());
        assert!(!store.is_inner());
        assert!(matches!(store.as_store(), Some(StoreError::Poisoned)));
        assert!(store.to_string().contains("store failure"));
        assert!(store.into_inner().is_none());

        let inner = LimiterError::Inner(io::Error::new(io::ErrorKind::Other, "handler"));
        assert!(inner.is_inner());
        assert!(inner.source().is_some());
        assert_eq!(inner.into_inner().unwrap().to_string(), "handler");
    }
}
