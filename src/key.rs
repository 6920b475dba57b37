//! Key derivation: which quota does this request count against?
//!
//! A [`KeyGenerator`] turns the head of an HTTP request into the string that
//! identifies "this client on this route". The default strategy is
//! `METHOD:path:client` where `client` is the `x-forwarded-for` header when it
//! is present and non-empty, else the transport peer address.
//!
//! The transport address is not part of `http::Request`; hosts attach it as a
//! [`RemoteAddr`] extension (axum's `ConnectInfo` can be mapped onto it).

use http::request::Parts;
use std::net::SocketAddr;

/// Header consulted before the transport address.
pub const FORWARDED_FOR: &str = "x-forwarded-for";

/// Client identifier used when neither header nor peer address is known.
pub const UNKNOWN_CLIENT: &str = "unknown";

/// Transport-level peer address of a request, stored in request extensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RemoteAddr(pub SocketAddr);

/// Pluggable key derivation strategy.
///
/// Implementations must be pure: identical request heads yield identical keys.
/// Any `Fn(&Parts) -> String + Send + Sync` closure is a `KeyGenerator`.
pub trait KeyGenerator: Send + Sync {
    /// Derive the quota key for a request.
    fn generate_key(&self, parts: &Parts) -> String;
}

impl<F> KeyGenerator for F
where
    F: Fn(&Parts) -> String + Send + Sync,
{
    fn generate_key(&self, parts: &Parts) -> String {
        self(parts)
    }
}

/// `METHOD:path:client` keys.
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultKeyGenerator;

impl DefaultKeyGenerator {
    /// Resolve the client identifier for a request head.
    pub fn client_id(parts: &Parts) -> String {
        let forwarded = parts
            .headers
            .get(FORWARDED_FOR)
            .and_then(|value| value.to_str().ok())
            .filter(|value| !value.is_empty());

        match forwarded {
            Some(value) => value.to_string(),
            None => parts
                .extensions
                .get::<RemoteAddr>()
                .map(|addr| addr.0.ip().to_string())
                .unwrap_or_else(|| UNKNOWN_CLIENT.to_string()),
        }
    }
}

impl KeyGenerator for DefaultKeyGenerator {
    fn generate_key(&self, parts: &Parts) -> String {
        format!("{}:{}:{}", parts.method, parts.uri.path(), Self::client_id(parts))
    }
}
