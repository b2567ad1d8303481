//! # One-Shot Prediction Handler
//!
//! `POST /api/v1/amd/predict` classifies a single complete audio payload.
//!
//! ## Validation Order:
//! 1. Rate limiting (per client IP, before any body processing)
//! 2. Call SID header format (`CA` + 32 hex characters, case-insensitive)
//! 3. Upload content type against the audio allow-list
//! 4. Size bounds while streaming the body (max) and after (min)
//!
//! Only after all validation passes does the backend get involved, so a
//! misconfigured classifier answers 503 without ever buffering the upload.

use crate::error::{AppError, AppResult};
use crate::limiter::client_identifier;
use crate::state::AppState;
use actix_multipart::Multipart;
use actix_web::{web, HttpRequest, HttpResponse};
use futures_util::TryStreamExt;
use serde::Deserialize;
use serde_json::json;
use tracing::info;

/// Content types accepted for uploaded audio.
///
/// `application/octet-stream` stays on the list because telephony providers
/// frequently send recordings without a proper MIME type.
const ALLOWED_CONTENT_TYPES: &[&str] = &[
    "audio/wav",
    "audio/mpeg",
    "audio/mp3",
    "audio/mp4",
    "audio/x-wav",
    "audio/wave",
    "application/octet-stream",
];

/// Query parameters for the prediction endpoint.
#[derive(Debug, Deserialize)]
pub struct PredictParams {
    /// Whether to trim silence and normalize before inference (default true).
    #[serde(default = "default_preprocess")]
    pub preprocess: bool,
}

fn default_preprocess() -> bool {
    true
}

/// Validate the telephony call identifier format: `CA` followed by 32 hex
/// characters, case-insensitive.
pub fn validate_call_sid(call_sid: &str) -> bool {
    call_sid.len() == 34
        && call_sid.is_char_boundary(2)
        && call_sid[..2].eq_ignore_ascii_case("CA")
        && call_sid[2..].bytes().all(|b| b.is_ascii_hexdigit())
}

/// ## Endpoint: `POST /api/v1/amd/predict`
///
/// Multipart upload with an `audio` file field; optional `X-Call-SID` header
/// and `preprocess` query flag. Responds with the verdict plus the audio
/// quality metrics computed from the decoded payload.
pub async fn predict_amd(
    req: HttpRequest,
    params: web::Query<PredictParams>,
    mut payload: Multipart,
    state: web::Data<AppState>,
) -> AppResult<HttpResponse> {
    // 1. Rate limiting
    let client_ip = client_identifier(&req);
    state.predict_limiter.check(&client_ip)?;

    // 2. Call SID format
    let call_sid = match req
        .headers()
        .get("X-Call-SID")
        .and_then(|value| value.to_str().ok())
    {
        Some(sid) if !sid.is_empty() => {
            if !validate_call_sid(sid) {
                return Err(AppError::ValidationError(
                    "Invalid Call SID format".to_string(),
                ));
            }
            sid.to_string()
        }
        _ => "unknown".to_string(),
    };

    let config = state.get_config();

    info!(call_sid = %call_sid, client_ip = %client_ip, "Processing AMD prediction");

    // 3. Read and validate the upload
    let audio_data = read_audio_field(
        &mut payload,
        config.max_upload_bytes(),
        config.audio.max_upload_mb,
    )
    .await?;

    if audio_data.len() < config.audio.min_audio_size_bytes {
        return Err(AppError::ValidationError(format!(
            "Audio file too small (< {} bytes)",
            config.audio.min_audio_size_bytes
        )));
    }

    // 4. Backend availability answers 503, never a degraded verdict
    state.detector.ensure_ready().await?;

    let (verdict, metrics) = state
        .detector
        .analyze_bytes(&audio_data, params.preprocess)
        .await;

    info!(
        call_sid = %call_sid,
        label = %verdict.label,
        confidence = verdict.confidence,
        processing_time_ms = verdict.processing_time_ms,
        "AMD result"
    );

    Ok(HttpResponse::Ok().json(json!({
        "label": verdict.label,
        "confidence": verdict.confidence,
        "reasoning": verdict.reasoning,
        "processing_time_ms": verdict.processing_time_ms,
        "audio_metrics": metrics,
        "call_sid": call_sid
    })))
}

/// Pull the `audio` field out of the multipart body, enforcing the content
/// type allow-list and the size ceiling while streaming.
async fn read_audio_field(
    payload: &mut Multipart,
    max_bytes: usize,
    max_mb: usize,
) -> Result<Vec<u8>, AppError> {
    while let Some(mut field) = payload
        .try_next()
        .await
        .map_err(|err| AppError::BadRequest(format!("Multipart error: {}", err)))?
    {
        if field.name() != Some("audio") {
            continue;
        }

        let content_type = field
            .content_type()
            .map(|mime| mime.essence_str().to_string())
            .unwrap_or_else(|| "application/octet-stream".to_string());

        if !ALLOWED_CONTENT_TYPES.contains(&content_type.as_str()) {
            return Err(AppError::ValidationError(format!(
                "Unsupported audio format: {}. Supported: WAV, MP3, MP4",
                content_type
            )));
        }

        let mut data = Vec::new();
        while let Some(chunk) = field
            .try_next()
            .await
            .map_err(|err| AppError::BadRequest(format!("Upload read error: {}", err)))?
        {
            if data.len() + chunk.len() > max_bytes {
                return Err(AppError::PayloadTooLarge(format!(
                    "File too large. Maximum size: {}MB",
                    max_mb
                )));
            }
            data.extend_from_slice(&chunk);
        }

        return Ok(data);
    }

    Err(AppError::ValidationError(
        "Missing 'audio' file field".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_call_sids() {
        assert!(validate_call_sid(
            "CA1234567890abcdef1234567890abcdef"
        ));
        // Case-insensitive prefix and hex digits.
        assert!(validate_call_sid(
            "ca1234567890ABCDEF1234567890abcdef"
        ));
    }

    #[test]
    fn test_invalid_call_sids() {
        assert!(!validate_call_sid(""));
        assert!(!validate_call_sid("CA123")); // too short
        assert!(!validate_call_sid("XX1234567890abcdef1234567890abcdef")); // wrong prefix
        assert!(!validate_call_sid("CA1234567890abcdef1234567890abcdeg")); // non-hex
        assert!(!validate_call_sid("CA1234567890abcdef1234567890abcdef0")); // too long
    }

    #[test]
    fn test_content_type_allow_list() {
        assert!(ALLOWED_CONTENT_TYPES.contains(&"audio/wav"));
        assert!(ALLOWED_CONTENT_TYPES.contains(&"application/octet-stream"));
        assert!(!ALLOWED_CONTENT_TYPES.contains(&"video/mp4"));
        assert!(!ALLOWED_CONTENT_TYPES.contains(&"text/plain"));
    }
}
