use crate::error::AppResult;
use crate::limiter::client_identifier;
use crate::state::AppState;
use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;

pub async fn health_check(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    state.health_limiter.check(&client_identifier(&req))?;

    let metrics = state.get_metrics_snapshot();
    let config = state.get_config();
    let uptime_seconds = state.get_uptime_seconds();
    let detector = state.detector.describe();

    Ok(HttpResponse::Ok().json(json!({
        "status": "healthy",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "service": {
            "name": "amd-ai-service",
            "version": env!("CARGO_PKG_VERSION"),
            "host": config.server.host,
            "port": config.server.port
        },
        "metrics": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "total_throttled": metrics.throttled_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "active_sessions": metrics.active_sessions
        },
        "detector": {
            "backend": detector.backend,
            "model": detector.model,
            "configured": detector.configured,
            "status": if detector.loaded {
                "ready"
            } else if detector.configured {
                "not_loaded"
            } else {
                "not_configured"
            },
            "sample_rate": detector.sample_rate,
            "confidence_threshold": detector.confidence_threshold
        }
    })))
}

pub async fn detailed_metrics(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    state.health_limiter.check(&client_identifier(&req))?;

    let metrics = state.get_metrics_snapshot();
    let uptime_seconds = state.get_uptime_seconds();
    let config = state.get_config();

    let mut endpoint_stats = Vec::new();
    for (endpoint, metric) in metrics.endpoint_metrics.iter() {
        endpoint_stats.push(json!({
            "endpoint": endpoint,
            "request_count": metric.request_count,
            "error_count": metric.error_count,
            "error_rate": metric.error_rate(),
            "average_duration_ms": metric.average_duration_ms(),
            "total_duration_ms": metric.total_duration_ms
        }));
    }

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "uptime_seconds": uptime_seconds,
        "overall": {
            "total_requests": metrics.request_count,
            "total_errors": metrics.error_count,
            "total_throttled": metrics.throttled_count,
            "error_rate": if metrics.request_count > 0 {
                metrics.error_count as f64 / metrics.request_count as f64
            } else {
                0.0
            },
            "active_sessions": metrics.active_sessions,
            "requests_per_second": if uptime_seconds > 0 {
                metrics.request_count as f64 / uptime_seconds as f64
            } else {
                0.0
            }
        },
        "endpoints": endpoint_stats,
        "rate_limits": {
            "predict": {
                "max_requests": config.limits.predict_max_requests,
                "window_secs": state.predict_limiter.window_secs(),
                "tracked_identifiers": state.predict_limiter.tracked_identifiers()
            },
            "health": {
                "max_requests": config.limits.health_max_requests,
                "window_secs": state.health_limiter.window_secs(),
                "tracked_identifiers": state.health_limiter.tracked_identifiers()
            }
        }
    })))
}
