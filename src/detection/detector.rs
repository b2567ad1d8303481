//! # AMD Detector
//!
//! The service object that request handlers and streaming sessions actually
//! talk to. Owns the classifier backend, applies the preprocessing pipeline
//! for the one-shot path, and annotates verdicts with human-readable
//! reasoning derived from audio quality.
//!
//! Constructed exactly once at startup and shared through the application
//! state; there are no global lookups anywhere in the detection path.

use crate::audio::processor::{self, AudioMetrics};
use crate::config::{AudioSettings, DetectionConfig};
use crate::detection::classifier::{AmdLabel, Classifier, Verdict};
use crate::error::AppError;
use anyhow::Result;
use serde::Serialize;
use std::time::Instant;
use tracing::info;

/// Read-only description of the detector for health and model-info output.
#[derive(Debug, Serialize)]
pub struct DetectorInfo {
    pub backend: String,
    pub model: String,
    pub configured: bool,
    pub loaded: bool,
    pub sample_rate: u32,
    pub confidence_threshold: f32,
}

/// Coordinates preprocessing and classification for every entry point.
pub struct AmdDetector {
    classifier: Classifier,
    detection: DetectionConfig,
    audio: AudioSettings,
}

impl AmdDetector {
    pub fn new(detection: DetectionConfig, audio: AudioSettings) -> Result<Self> {
        let classifier = Classifier::from_config(&detection)?;
        info!(
            backend = classifier.backend_name(),
            "AMD detector initialized (model loads on first use)"
        );
        Ok(Self {
            classifier,
            detection,
            audio,
        })
    }

    /// Fail fast when the backend cannot serve at all.
    ///
    /// The one-shot endpoint calls this before reading the upload so a missing
    /// API key or a failing model load answers 503 instead of producing an
    /// `unknown` verdict.
    pub async fn ensure_ready(&self) -> Result<(), AppError> {
        match &self.classifier {
            Classifier::Local(manager) => manager
                .ensure_loaded()
                .await
                .map(|_| ())
                .map_err(|err| AppError::ServiceUnavailable(format!("Model load failed: {}", err))),
            Classifier::Remote(remote) => {
                if remote.is_configured() {
                    Ok(())
                } else {
                    Err(AppError::ServiceUnavailable(
                        "Remote classifier not configured".to_string(),
                    ))
                }
            }
        }
    }

    /// Streaming path: preprocess an already-decoded buffer and classify it.
    ///
    /// Same trim → normalize → cap sequence as the one-shot path, minus the
    /// format loading (streamed frames are raw PCM by protocol).
    pub async fn classify_buffered(&self, samples: &[f32], sample_rate: u32) -> Verdict {
        if samples.is_empty() {
            return Verdict::failure("empty audio array", 0);
        }

        let trimmed = processor::trim_silence(samples, self.audio.silence_threshold);
        let prepared = processor::normalize(trimmed, self.audio.target_peak);
        let prepared =
            processor::apply_length_cap(prepared, sample_rate, self.audio.max_length_seconds);

        self.classifier.classify(&prepared, sample_rate).await
    }

    /// One-shot path: decode, measure, preprocess, cap, classify, annotate.
    ///
    /// ## Processing Steps:
    /// 1. Format loading (WAV or raw PCM fallback) to the configured rate
    /// 2. Quality metrics, computed once from the loaded audio
    /// 3. Optional silence trim + peak normalization
    /// 4. Length cap before inference
    /// 5. Classification, with reasoning derived from metrics when the
    ///    backend supplied none
    ///
    /// Failures downgrade to `unknown` verdicts; the metrics snapshot is
    /// returned whenever the audio decoded at all.
    pub async fn analyze_bytes(
        &self,
        data: &[u8],
        preprocess: bool,
    ) -> (Verdict, Option<AudioMetrics>) {
        let start = Instant::now();

        let (samples, sample_rate) = processor::load_audio_from_bytes(data, self.audio.sample_rate);

        if samples.is_empty() {
            let elapsed = start.elapsed().as_millis() as u64;
            return (Verdict::failure("empty audio array", elapsed), None);
        }

        let metrics = AudioMetrics::from_samples(&samples, sample_rate);
        info!(
            duration_s = metrics.duration_seconds,
            rms = metrics.rms_level,
            "Audio loaded for classification"
        );

        let prepared = if preprocess {
            let trimmed = processor::trim_silence(&samples, self.audio.silence_threshold);
            processor::normalize(trimmed, self.audio.target_peak)
        } else {
            samples
        };

        let prepared =
            processor::apply_length_cap(prepared, sample_rate, self.audio.max_length_seconds);

        let mut verdict = self.classifier.classify(&prepared, sample_rate).await;

        // Report the whole pipeline latency, not just the inference call.
        verdict.processing_time_ms = start.elapsed().as_millis() as u64;

        if verdict.reasoning.is_none() {
            verdict.reasoning = Some(generate_reasoning(
                verdict.label,
                verdict.confidence,
                &metrics,
            ));
        }

        (verdict, Some(metrics))
    }

    pub fn describe(&self) -> DetectorInfo {
        let (model, configured, loaded) = match &self.classifier {
            Classifier::Local(manager) => (
                self.detection.model_repo.clone(),
                true,
                manager.is_loaded(),
            ),
            Classifier::Remote(remote) => (
                self.detection.remote_endpoint.clone(),
                remote.is_configured(),
                remote.is_configured(),
            ),
        };

        DetectorInfo {
            backend: self.detection.backend.clone(),
            model,
            configured,
            loaded,
            sample_rate: self.audio.sample_rate,
            confidence_threshold: self.detection.confidence_threshold,
        }
    }
}

/// Compose a short human-readable explanation from the verdict and the audio
/// quality snapshot.
fn generate_reasoning(label: AmdLabel, confidence: f32, metrics: &AudioMetrics) -> String {
    let mut reasons = Vec::new();

    if metrics.is_too_quiet {
        reasons.push("audio very quiet".to_string());
    }

    if metrics.is_clipping {
        reasons.push("audio clipping detected".to_string());
    }

    if confidence > 0.9 {
        reasons.push(format!("high confidence {} detection", label));
    } else if confidence > 0.7 {
        reasons.push(format!("moderate confidence {} detection", label));
    } else {
        reasons.push(format!("low confidence {} detection", label));
    }

    if metrics.duration_seconds < 1.0 {
        reasons.push("very short audio".to_string());
    }

    reasons.join(", ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn stub_detector() -> AmdDetector {
        let config = AppConfig::default();
        let mut detection = config.detection;
        detection.backend = "stub".to_string();
        AmdDetector::new(detection, config.audio).unwrap()
    }

    fn raw_pcm(sample: i16, count: usize) -> Vec<u8> {
        let mut data = Vec::with_capacity(count * 2);
        for _ in 0..count {
            data.extend_from_slice(&sample.to_le_bytes());
        }
        data
    }

    #[tokio::test]
    async fn test_analyze_bytes_produces_verdict_and_metrics() {
        let detector = stub_detector();

        // One second of audible tone at 16kHz.
        let data = raw_pcm(9830, 16000);
        let (verdict, metrics) = detector.analyze_bytes(&data, true).await;

        assert_eq!(verdict.label, AmdLabel::Human);
        assert!(verdict.confidence > 0.5);
        assert!(verdict.reasoning.is_some());

        let metrics = metrics.expect("metrics should be present");
        assert!((metrics.duration_seconds - 1.0).abs() < 1e-6);
        assert!(!metrics.is_too_quiet);
    }

    #[tokio::test]
    async fn test_analyze_bytes_empty_input_downgrades() {
        let detector = stub_detector();
        let (verdict, metrics) = detector.analyze_bytes(&[], true).await;

        assert_eq!(verdict.label, AmdLabel::Unknown);
        assert_eq!(verdict.confidence, 0.0);
        assert!(metrics.is_none());
    }

    #[tokio::test]
    async fn test_classify_buffered_preprocesses() {
        let detector = stub_detector();

        // Audible burst padded with silence: trimming drops the padding, so
        // the stub sees a short utterance and calls it human.
        let mut samples = vec![0.0f32; 8000];
        samples.extend(vec![0.3f32; 8000]);
        samples.extend(vec![0.0f32; 8000]);

        let verdict = detector.classify_buffered(&samples, 16000).await;
        assert_eq!(verdict.label, AmdLabel::Human);
    }

    #[tokio::test]
    async fn test_classify_buffered_empty_downgrades() {
        let detector = stub_detector();
        let verdict = detector.classify_buffered(&[], 16000).await;
        assert_eq!(verdict.label, AmdLabel::Unknown);
        assert_eq!(verdict.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_analyze_bytes_skip_preprocessing() {
        let detector = stub_detector();
        let data = raw_pcm(9830, 16000);
        let (verdict, _) = detector.analyze_bytes(&data, false).await;
        assert_eq!(verdict.label, AmdLabel::Human);
    }

    #[tokio::test]
    async fn test_ensure_ready_remote_unconfigured() {
        let config = AppConfig::default();
        let mut detection = config.detection;
        detection.backend = "remote".to_string();
        detection.remote_endpoint = String::new();

        let detector = AmdDetector::new(detection, config.audio).unwrap();
        match detector.ensure_ready().await {
            Err(AppError::ServiceUnavailable(_)) => {}
            other => panic!("expected ServiceUnavailable, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_generate_reasoning_bands() {
        let metrics = AudioMetrics::from_samples(&vec![0.5f32; 32000], 16000);

        let high = generate_reasoning(AmdLabel::Voicemail, 0.95, &metrics);
        assert!(high.contains("high confidence voicemail detection"));

        let moderate = generate_reasoning(AmdLabel::Human, 0.8, &metrics);
        assert!(moderate.contains("moderate confidence human detection"));

        let low = generate_reasoning(AmdLabel::Unknown, 0.4, &metrics);
        assert!(low.contains("low confidence unknown detection"));
    }

    #[test]
    fn test_generate_reasoning_quality_flags() {
        let quiet = AudioMetrics::from_samples(&vec![0.001f32; 8000], 16000);
        let reasoning = generate_reasoning(AmdLabel::Unknown, 0.3, &quiet);
        assert!(reasoning.contains("audio very quiet"));
        assert!(reasoning.contains("very short audio"));
    }

    #[test]
    fn test_describe_stub_backend() {
        let detector = stub_detector();
        let info = detector.describe();
        assert_eq!(info.backend, "stub");
        assert!(info.configured);
        assert!(!info.loaded);
        assert_eq!(info.sample_rate, 16000);
    }
}
