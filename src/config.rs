//! # Configuration Management
//!
//! This module handles loading and managing application configuration from multiple sources:
//! - TOML configuration files (config.toml)
//! - Environment variables (with APP_ prefix)
//! - Default values (built into the code)
//!
//! ## Configuration Priority (highest to lowest):
//! 1. Environment variables (APP_SERVER_HOST, APP_DETECTION_BACKEND, etc.)
//! 2. Configuration file (config.toml)
//! 3. Default values (defined in the Default impl)
//!
//! ## Configuration Groups:
//! - **server**: Bind address for the HTTP/WebSocket server
//! - **audio**: Sample format, buffering thresholds, and upload bounds
//! - **detection**: Classifier backend selection and model parameters
//! - **limits**: Sliding-window rate limits for the API endpoints

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

/// Main application configuration that contains all settings.
///
/// Breaking configuration into logical groups (server, audio, detection, limits)
/// makes it easier to understand and maintain as the application grows.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub audio: AudioSettings,
    pub detection: DetectionConfig,
    pub limits: RateLimitConfig,
}

/// Server-specific configuration settings.
///
/// ## Common values:
/// - `host = "127.0.0.1"`: Only accept connections from localhost (development)
/// - `host = "0.0.0.0"`: Accept connections from any IP address (production)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Audio format and buffering configuration.
///
/// ## Fields:
/// - `sample_rate`: Expected PCM sample rate for streaming audio (Hz)
/// - `channels`: Expected channel count (mono telephone audio)
/// - `buffer_threshold_ms`: Buffered duration that triggers a classification
/// - `idle_timeout_secs`: Seconds without a chunk before a forced classification
/// - `min_audio_size_bytes`: Smallest upload accepted by the one-shot endpoint
/// - `max_upload_mb`: Largest upload accepted by the one-shot endpoint
/// - `max_length_seconds`: Audio longer than this is truncated before inference
/// - `silence_threshold`: Amplitude below which samples count as silence
/// - `target_peak`: Peak level that normalization scales audio towards
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioSettings {
    pub sample_rate: u32,
    pub channels: u8,
    pub buffer_threshold_ms: u32,
    pub idle_timeout_secs: u64,
    pub min_audio_size_bytes: usize,
    pub max_upload_mb: usize,
    pub max_length_seconds: u32,
    pub silence_threshold: f32,
    pub target_peak: f32,
}

/// Classifier backend configuration.
///
/// ## Backends:
/// - `"local"`: In-process inference with a model pulled from HuggingFace
/// - `"remote"`: Upload-and-poll classification against an external AI endpoint
/// - `"stub"`: Deterministic energy-based verdicts, no model download (development)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionConfig {
    pub backend: String,
    pub model_repo: String,
    pub confidence_threshold: f32,
    pub remote_endpoint: String,
    pub poll_interval_ms: u64,
    pub request_timeout_secs: u64,
}

impl DetectionConfig {
    /// API key for the remote classifier, read from the environment.
    ///
    /// Kept out of the config file so the key never lands on disk.
    pub fn remote_api_key() -> Option<String> {
        env::var("AMD_REMOTE_API_KEY")
            .ok()
            .filter(|key| !key.is_empty())
    }

}

/// Sliding-window rate limits, one pair per guarded surface.
///
/// The prediction endpoints and the health endpoints get independent limiters
/// so health probes cannot starve (or be starved by) classification traffic.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub predict_max_requests: usize,
    pub predict_window_secs: u64,
    pub health_max_requests: usize,
    pub health_window_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            audio: AudioSettings {
                sample_rate: 16000, // Telephone-grade mono PCM
                channels: 1,
                buffer_threshold_ms: 3000,
                idle_timeout_secs: 5,
                min_audio_size_bytes: 1000,
                max_upload_mb: 10,
                max_length_seconds: 30,
                silence_threshold: 0.01,
                target_peak: 0.9,
            },
            detection: DetectionConfig {
                backend: "local".to_string(),
                model_repo: "telephony-ai/amd-classifier".to_string(),
                confidence_threshold: 0.7,
                remote_endpoint: String::new(),
                poll_interval_ms: 100,
                request_timeout_secs: 15,
            },
            limits: RateLimitConfig {
                predict_max_requests: 20,
                predict_window_secs: 60,
                health_max_requests: 100,
                health_window_secs: 60,
            },
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources in priority order.
    ///
    /// ## Configuration Loading Process:
    /// 1. Start with built-in defaults
    /// 2. Override with values from config.toml (if it exists)
    /// 3. Override with environment variables prefixed with APP_
    /// 4. Handle special cases for HOST and PORT environment variables
    ///
    /// ## Environment Variable Examples:
    /// - `APP_SERVER_PORT=3000`: Override server port
    /// - `APP_DETECTION_BACKEND=remote`: Select the remote classifier
    /// - `HOST=0.0.0.0` / `PORT=3000`: Special cases for deployment platforms
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(config::Environment::with_prefix("APP").separator("_"));

        // Deployment platforms commonly inject these without the APP_ prefix.
        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config = settings.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Validate that the configuration values make sense.
    ///
    /// Catching configuration errors early prevents runtime failures and
    /// provides clear error messages about what's wrong.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        if self.audio.sample_rate == 0 {
            return Err(anyhow::anyhow!("Sample rate must be greater than 0"));
        }

        if self.audio.channels == 0 {
            return Err(anyhow::anyhow!("Channel count must be greater than 0"));
        }

        if self.audio.buffer_threshold_ms == 0 {
            return Err(anyhow::anyhow!("Buffer threshold must be greater than 0"));
        }

        if self.audio.max_upload_mb == 0 {
            return Err(anyhow::anyhow!("Max upload size must be greater than 0"));
        }

        if !(0.0..=1.0).contains(&self.detection.confidence_threshold) {
            return Err(anyhow::anyhow!(
                "Confidence threshold must be between 0.0 and 1.0"
            ));
        }

        match self.detection.backend.as_str() {
            "local" | "remote" | "stub" => {}
            other => {
                return Err(anyhow::anyhow!(
                    "Unknown detection backend '{}' (expected local, remote, or stub)",
                    other
                ));
            }
        }

        if self.detection.poll_interval_ms == 0 {
            return Err(anyhow::anyhow!("Poll interval must be greater than 0"));
        }

        if self.limits.predict_max_requests == 0 || self.limits.health_max_requests == 0 {
            return Err(anyhow::anyhow!(
                "Rate limits must allow at least one request"
            ));
        }

        Ok(())
    }

    /// Maximum one-shot upload size in bytes.
    pub fn max_upload_bytes(&self) -> usize {
        self.audio.max_upload_mb * 1024 * 1024
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Test that the default configuration is valid and has expected values.
    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.audio.sample_rate, 16000);
        assert_eq!(config.limits.predict_max_requests, 20);
        assert!(config.validate().is_ok());
    }

    /// Test that validation catches invalid configurations.
    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.detection.confidence_threshold = 1.5;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.detection.backend = "quantum".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_max_upload_bytes() {
        let config = AppConfig::default();
        assert_eq!(config.max_upload_bytes(), 10 * 1024 * 1024);
    }
}
