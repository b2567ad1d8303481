//! # Application State Management
//!
//! This module manages shared state that needs to be accessed by multiple HTTP
//! request handlers and WebSocket sessions simultaneously.
//!
//! ## Arc<RwLock<T>> Pattern
//! - **Arc**: Multiple ownership (many handlers can hold a reference)
//! - **RwLock**: Multiple readers OR one writer at a time
//! - **T**: The actual data type being protected
//!
//! ## What is shared:
//! - **config**: Loaded once, read everywhere
//! - **metrics**: Updated by every request through the middleware
//! - **detector**: The classification service, including the model lifecycle
//!   manager (explicit dependency injection, no global lookups)
//! - **limiters**: The two admission controllers, one per guarded surface

use crate::config::AppConfig;
use crate::detection::AmdDetector;
use crate::limiter::RateLimiter;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// The main application state shared across all request handlers.
///
/// ## Thread Safety Pattern:
/// Mutable data sits behind Arc<RwLock<T>>; the detector and the limiters do
/// their own internal locking, so plain Arc is enough for them.
#[derive(Clone)]
pub struct AppState {
    /// Application configuration (loaded at startup)
    pub config: Arc<RwLock<AppConfig>>,

    /// Performance metrics (constantly being updated by requests)
    pub metrics: Arc<RwLock<AppMetrics>>,

    /// When the server started
    pub start_time: Instant,

    /// The AMD detection service: classifier backend + model lifecycle
    pub detector: Arc<AmdDetector>,

    /// Admission controller for the prediction endpoints
    pub predict_limiter: Arc<RateLimiter>,

    /// Admission controller for the health endpoints
    pub health_limiter: Arc<RateLimiter>,
}

/// Performance metrics collected across all HTTP requests.
#[derive(Debug, Default)]
pub struct AppMetrics {
    /// Total number of HTTP requests processed since server start
    pub request_count: u64,

    /// Total number of errors encountered since server start
    pub error_count: u64,

    /// Requests rejected by the admission controllers (429 responses)
    pub throttled_count: u64,

    /// Current number of active streaming sessions
    pub active_sessions: u32,

    /// Detailed metrics for each API endpoint
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

/// Detailed performance metrics for a specific API endpoint.
#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    /// Number of requests to this specific endpoint
    pub request_count: u64,

    /// Total time spent processing all requests to this endpoint (milliseconds)
    pub total_duration_ms: u64,

    /// Number of errors that occurred for this endpoint
    pub error_count: u64,
}

impl AppState {
    /// Create the application state.
    ///
    /// The detector is built by the caller (main) so a construction failure
    /// stops startup instead of surfacing on the first request.
    pub fn new(config: AppConfig, detector: Arc<AmdDetector>) -> Self {
        let predict_limiter = Arc::new(RateLimiter::new(
            config.limits.predict_max_requests,
            config.limits.predict_window_secs,
        ));
        let health_limiter = Arc::new(RateLimiter::new(
            config.limits.health_max_requests,
            config.limits.health_window_secs,
        ));

        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            start_time: Instant::now(),
            detector,
            predict_limiter,
            health_limiter,
        }
    }

    /// Get a copy of the current configuration.
    ///
    /// Cloning releases the read lock immediately so other threads are never
    /// blocked while a handler works with the values.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().unwrap().clone()
    }

    /// Increment the total request counter (called by middleware for every request).
    pub fn increment_request_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.request_count += 1;
    }

    /// Increment the total error counter (called when any request fails).
    pub fn increment_error_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.error_count += 1;
    }

    /// Increment the throttled counter (429 responses from the limiters).
    pub fn increment_throttled_count(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.throttled_count += 1;
    }

    /// Record detailed metrics for a specific endpoint.
    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write().unwrap();

        let endpoint_metric = metrics
            .endpoint_metrics
            .entry(endpoint.to_string())
            .or_default();

        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;

        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Increment the active sessions counter (streaming session connected).
    pub fn increment_active_sessions(&self) {
        let mut metrics = self.metrics.write().unwrap();
        metrics.active_sessions += 1;
    }

    /// Decrement the active sessions counter (streaming session closed).
    ///
    /// Guards against underflow so a stray double-close cannot panic.
    pub fn decrement_active_sessions(&self) {
        let mut metrics = self.metrics.write().unwrap();
        if metrics.active_sessions > 0 {
            metrics.active_sessions -= 1;
        }
    }

    /// Get a snapshot of current metrics (used for the /metrics endpoint).
    ///
    /// Clones the data so the lock is not held while serializing the HTTP
    /// response.
    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        let metrics = self.metrics.read().unwrap();
        AppMetrics {
            request_count: metrics.request_count,
            error_count: metrics.error_count,
            throttled_count: metrics.throttled_count,
            active_sessions: metrics.active_sessions,
            endpoint_metrics: metrics.endpoint_metrics.clone(),
        }
    }

    /// Get server uptime in seconds.
    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

impl EndpointMetric {
    /// Average response time for this endpoint in milliseconds.
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Error rate for this endpoint as a fraction (0.0 to 1.0).
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_state() -> AppState {
        let config = AppConfig::default();
        let mut detection = config.detection.clone();
        detection.backend = "stub".to_string();
        let detector =
            Arc::new(AmdDetector::new(detection, config.audio.clone()).unwrap());
        AppState::new(config, detector)
    }

    #[test]
    fn test_session_counters() {
        let state = test_state();
        state.increment_active_sessions();
        state.increment_active_sessions();
        assert_eq!(state.get_metrics_snapshot().active_sessions, 2);

        state.decrement_active_sessions();
        state.decrement_active_sessions();
        state.decrement_active_sessions(); // extra decrement must not underflow
        assert_eq!(state.get_metrics_snapshot().active_sessions, 0);
    }

    #[test]
    fn test_endpoint_metrics() {
        let state = test_state();
        state.record_endpoint_request("POST /api/v1/amd/predict", 100, false);
        state.record_endpoint_request("POST /api/v1/amd/predict", 300, true);

        let snapshot = state.get_metrics_snapshot();
        let metric = &snapshot.endpoint_metrics["POST /api/v1/amd/predict"];
        assert_eq!(metric.request_count, 2);
        assert_eq!(metric.average_duration_ms(), 200.0);
        assert_eq!(metric.error_rate(), 0.5);
    }

    #[test]
    fn test_limiters_configured_independently() {
        let state = test_state();
        assert_eq!(state.predict_limiter.window_secs(), 60);
        assert_eq!(state.health_limiter.window_secs(), 60);

        // Different limits: the 21st predict check fails long before the
        // health limiter would.
        for _ in 0..20 {
            assert!(state.predict_limiter.check("ip").is_ok());
        }
        assert!(state.predict_limiter.check("ip").is_err());
        assert!(state.health_limiter.check("ip").is_ok());
    }
}
