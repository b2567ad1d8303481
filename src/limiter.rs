//! # Admission Control
//!
//! Sliding-window rate limiting for the classification and health endpoints.
//! Each limiter keeps, per caller identifier, the timestamps of requests made
//! inside the trailing window. A check prunes expired timestamps and records
//! the new request in one critical section, so two concurrent requests can
//! never both claim the last remaining slot.
//!
//! Two independently configured instances exist in [`crate::state::AppState`]:
//! one for the prediction endpoints and one for the lightweight health checks.

use crate::error::AppError;
use actix_web::HttpRequest;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Simple in-memory sliding-window rate limiter.
///
/// ## Memory Characteristics:
/// Identifier entries are never evicted once created; the map grows with the
/// number of distinct callers seen over the process lifetime. Timestamps inside
/// each entry are pruned on every check. An eviction sweep for long-idle
/// identifiers is an open follow-up (see DESIGN.md).
pub struct RateLimiter {
    max_requests: usize,
    window: Duration,
    requests: Mutex<HashMap<String, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new(max_requests: usize, window_secs: u64) -> Self {
        Self {
            max_requests,
            window: Duration::from_secs(window_secs),
            requests: Mutex::new(HashMap::new()),
        }
    }

    /// Check whether a request from `identifier` is allowed right now.
    ///
    /// On success the request is recorded against the window. On denial the
    /// returned error carries a retry-after hint equal to the window length.
    pub fn check(&self, identifier: &str) -> Result<(), AppError> {
        self.check_at(identifier, Instant::now())
    }

    /// Core check against an explicit clock reading.
    ///
    /// Prune-then-count-then-record happens under one lock acquisition, which
    /// is what makes concurrent checks race-free.
    fn check_at(&self, identifier: &str, now: Instant) -> Result<(), AppError> {
        let mut requests = self
            .requests
            .lock()
            .map_err(|_| AppError::Internal("rate limiter lock poisoned".to_string()))?;

        let timestamps = requests.entry(identifier.to_string()).or_default();

        // Drop requests that have aged out of the trailing window.
        let window = self.window;
        timestamps.retain(|&t| now.duration_since(t) < window);

        if timestamps.len() >= self.max_requests {
            return Err(AppError::RateLimited {
                retry_after_secs: self.window.as_secs(),
            });
        }

        timestamps.push(now);
        Ok(())
    }

    /// Window length in seconds, used for response headers and health output.
    pub fn window_secs(&self) -> u64 {
        self.window.as_secs()
    }

    /// Number of distinct identifiers currently tracked.
    pub fn tracked_identifiers(&self) -> usize {
        self.requests.lock().map(|map| map.len()).unwrap_or(0)
    }
}

/// Extract the caller identity used as the rate-limit key.
///
/// Prefers the proxy-aware real IP (X-Forwarded-For / X-Real-IP handled by
/// actix) and falls back to the peer address.
pub fn client_identifier(req: &HttpRequest) -> String {
    req.connection_info()
        .realip_remote_addr()
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allows_up_to_limit_then_denies() {
        let limiter = RateLimiter::new(20, 60);
        let now = Instant::now();

        // 20 checks inside one second all succeed.
        for i in 0..20 {
            let t = now + Duration::from_millis(i * 50);
            assert!(
                limiter.check_at("10.0.0.1", t).is_ok(),
                "request {} should be allowed",
                i
            );
        }

        // The 21st inside the same window is denied with retry-after = 60.
        match limiter.check_at("10.0.0.1", now + Duration::from_secs(1)) {
            Err(AppError::RateLimited { retry_after_secs }) => {
                assert_eq!(retry_after_secs, 60);
            }
            other => panic!("expected RateLimited, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_window_expiry_frees_slots() {
        let limiter = RateLimiter::new(2, 60);
        let now = Instant::now();

        assert!(limiter.check_at("caller", now).is_ok());
        assert!(limiter.check_at("caller", now + Duration::from_secs(1)).is_ok());
        assert!(limiter.check_at("caller", now + Duration::from_secs(2)).is_err());

        // After the first request ages out, a slot opens up again.
        assert!(limiter
            .check_at("caller", now + Duration::from_secs(61))
            .is_ok());
    }

    #[test]
    fn test_identifiers_are_independent() {
        let limiter = RateLimiter::new(1, 60);
        let now = Instant::now();

        assert!(limiter.check_at("a", now).is_ok());
        assert!(limiter.check_at("b", now).is_ok());
        assert!(limiter.check_at("a", now).is_err());
        assert_eq!(limiter.tracked_identifiers(), 2);
    }

    #[test]
    fn test_denied_check_is_not_recorded() {
        let limiter = RateLimiter::new(1, 60);
        let now = Instant::now();

        assert!(limiter.check_at("caller", now).is_ok());
        for i in 0..5 {
            assert!(limiter
                .check_at("caller", now + Duration::from_secs(i))
                .is_err());
        }

        // Denied attempts must not extend the window occupancy.
        assert!(limiter
            .check_at("caller", now + Duration::from_secs(61))
            .is_ok());
    }
}
