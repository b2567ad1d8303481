//! # Model Info REST Handler
//!
//! Read-only endpoint reporting which classifier backend is configured, its
//! load state, and basic model metadata. No side effects: probing this
//! endpoint never triggers a model load.

use crate::error::AppResult;
use crate::limiter::client_identifier;
use crate::state::AppState;
use actix_web::{web, HttpRequest, HttpResponse};
use serde_json::json;

/// ## Endpoint: `GET /api/v1/amd/model-info`
pub async fn model_info(
    req: HttpRequest,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    state.health_limiter.check(&client_identifier(&req))?;

    let info = state.detector.describe();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "backend": info.backend,
        "model": info.model,
        "configured": info.configured,
        "loaded": info.loaded,
        "sample_rate": info.sample_rate,
        "confidence_threshold": info.confidence_threshold
    })))
}
