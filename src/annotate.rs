//! Stamping verdict metadata onto responses.

use http::header::{HeaderValue, CONTENT_TYPE};
use http::{HeaderMap, Response, StatusCode};

use crate::engine::Verdict;

/// Configured max admits per window.
pub const X_RATE_LIMIT_LIMIT: &str = "x-rate-limit-limit";
/// Quota left in the current window.
pub const X_RATE_LIMIT_REMAINING: &str = "x-rate-limit-remaining";
/// Epoch milliseconds at which the window expires.
pub const X_RATE_LIMIT_RESET: &str = "x-rate-limit-reset";

/// Message carried by rejection responses.
pub const LIMIT_EXCEEDED_MESSAGE: &str = "Rate Limit Exceeded";

/// Write the three rate limit headers, replacing any existing values.
pub fn apply_headers(headers: &mut HeaderMap, verdict: &Verdict) {
    let remaining = if verdict.admitted { verdict.remaining } else { 0 };
    headers.insert(X_RATE_LIMIT_LIMIT, HeaderValue::from(verdict.limit));
    headers.insert(X_RATE_LIMIT_REMAINING, HeaderValue::from(remaining));
    headers.insert(X_RATE_LIMIT_RESET, HeaderValue::from(verdict.reset_at_millis));
}

/// Stamp a verdict onto a response, admitted or not.
pub fn annotate<B>(response: &mut Response<B>, verdict: &Verdict) {
    apply_headers(response.headers_mut(), verdict);
}

/// Synthesize the 429 response for a rejected request, headers included.
pub fn rejection_response<B>(verdict: &Verdict) -> Response<B>
where
    B: From<String>,
{
    let status = StatusCode::TOO_MANY_REQUESTS;
    let body = serde_json::json!({
        "statusCode": status.as_u16(),
        "error": status.canonical_reason().unwrap_or("Too Many Requests"),
        "message": LIMIT_EXCEEDED_MESSAGE,
    })
    .to_string();

    let mut response = Response::new(B::from(body));
    *response.status_mut() = status;
    response.headers_mut().insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
    annotate(&mut response, verdict);
    response
}
