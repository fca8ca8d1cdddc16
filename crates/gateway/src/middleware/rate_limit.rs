//! Per-client rate limiting middleware using the token bucket algorithm
//!
//! Clients are keyed by a hash of their Authorization header, falling back
//! to the forwarded client address.

use crate::app::AppState;
use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{DefaultKeyedRateLimiter, Quota, RateLimiter};
use relayforge_common::{errors::AppError, metrics};
use sha2::{Digest, Sha256};
use std::num::NonZeroU32;
use std::sync::Arc;

/// Keyed rate limiter using governor crate
pub type KeyedRateLimiter = DefaultKeyedRateLimiter<String>;

/// Create a new rate limiter
pub fn create_rate_limiter(requests_per_second: u32, burst: u32) -> Arc<KeyedRateLimiter> {
    let rate = NonZeroU32::new(requests_per_second).unwrap_or(NonZeroU32::MIN);
    let burst = NonZeroU32::new(burst.max(requests_per_second)).unwrap_or(rate);

    Arc::new(RateLimiter::keyed(Quota::per_second(rate).allow_burst(burst)))
}

/// Identity used to bucket a request
pub fn client_key(headers: &HeaderMap) -> String {
    if let Some(auth) = headers.get(AUTHORIZATION).and_then(|v| v.to_str().ok()) {
        let digest = Sha256::digest(auth.as_bytes());
        return format!("auth:{}", hex::encode(&digest[..8]));
    }

    headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .or_else(|| headers.get("x-real-ip").and_then(|v| v.to_str().ok()))
        .map(|ip| format!("ip:{}", ip.trim()))
        .unwrap_or_else(|| "anonymous".to_string())
}

/// Rate limiting middleware
pub async fn rate_limit(State(state): State<AppState>, request: Request, next: Next) -> Response {
    let Some(limiter) = state.limiter.as_ref() else {
        return next.run(request).await;
    };

    let key = client_key(request.headers());
    match limiter.check_key(&key) {
        Ok(_) => next.run(request).await,
        Err(_) => {
            tracing::warn!(client = %key, "Rate limit exceeded");
            metrics::record_rate_limited();
            AppError::RateLimited {
                limit: state.config.rate_limit.requests_per_second,
            }
            .into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_rate_limiter_creation() {
        let limiter = create_rate_limiter(100, 200);
        assert!(limiter.check_key(&"client".to_string()).is_ok());
    }

    #[test]
    fn test_zero_rate_is_clamped() {
        let limiter = create_rate_limiter(0, 0);
        let key = "client".to_string();
        assert!(limiter.check_key(&key).is_ok());
        assert!(limiter.check_key(&key).is_err());
    }

    #[test]
    fn test_buckets_are_per_client() {
        let limiter = create_rate_limiter(1, 1);
        assert!(limiter.check_key(&"a".to_string()).is_ok());
        assert!(limiter.check_key(&"a".to_string()).is_err());
        assert!(limiter.check_key(&"b".to_string()).is_ok());
    }

    #[test]
    fn test_client_key() {
        let mut headers = HeaderMap::new();
        assert_eq!(client_key(&headers), "anonymous");

        headers.insert("x-forwarded-for", HeaderValue::from_static("10.0.0.1, 10.0.0.2"));
        assert_eq!(client_key(&headers), "ip:10.0.0.1");

        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer rfk_abc"));
        let key = client_key(&headers);
        assert!(key.starts_with("auth:"));
        assert!(!key.contains("rfk_abc"));
    }
}
