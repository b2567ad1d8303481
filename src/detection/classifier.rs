//! # Classifier Capability
//!
//! One `classify` entry point over the two interchangeable backends: local
//! in-process inference and the remote upload-and-poll endpoint. Sessions and
//! handlers consume both identically.
//!
//! ## Failure Downgrade:
//! Any internal error or network failure during classification becomes an
//! `unknown` verdict with confidence 0.0 and a bounded diagnostic string.
//! Raw error chains never cross this boundary.

use crate::config::DetectionConfig;
use crate::detection::manager::ModelManager;
use crate::detection::remote::RemoteClassifier;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::warn;

/// Longest reasoning string a verdict will carry.
pub const MAX_REASONING_LEN: usize = 100;

/// Classification outcome for a single audio segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AmdLabel {
    Human,
    Voicemail,
    Unknown,
}

impl AmdLabel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AmdLabel::Human => "human",
            AmdLabel::Voicemail => "voicemail",
            AmdLabel::Unknown => "unknown",
        }
    }
}

impl fmt::Display for AmdLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Structured result of a classification attempt.
///
/// ## Invariant:
/// Confidence is clamped into [0.0, 1.0] at construction, even when an
/// upstream source returns an out-of-range value.
#[derive(Debug, Clone, Serialize)]
pub struct Verdict {
    pub label: AmdLabel,
    pub confidence: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reasoning: Option<String>,
    pub processing_time_ms: u64,
}

impl Verdict {
    pub fn new(
        label: AmdLabel,
        confidence: f32,
        reasoning: Option<String>,
        processing_time_ms: u64,
    ) -> Self {
        Self {
            label,
            confidence: confidence.clamp(0.0, 1.0),
            reasoning: reasoning.map(truncate_reasoning),
            processing_time_ms,
        }
    }

    /// Downgraded verdict for a failed classification attempt.
    pub fn failure(reason: &str, processing_time_ms: u64) -> Self {
        Self::new(
            AmdLabel::Unknown,
            0.0,
            Some(format!("Processing error: {}", reason)),
            processing_time_ms,
        )
    }

    /// Verdict for a remote response stripped by content policy filters.
    pub fn blocked(processing_time_ms: u64) -> Self {
        Self::new(
            AmdLabel::Unknown,
            0.5,
            Some("Response blocked by content filters".to_string()),
            processing_time_ms,
        )
    }
}

/// Bound the reasoning string without splitting a UTF-8 character.
fn truncate_reasoning(mut reason: String) -> String {
    if reason.len() > MAX_REASONING_LEN {
        let mut end = MAX_REASONING_LEN;
        while !reason.is_char_boundary(end) {
            end -= 1;
        }
        reason.truncate(end);
    }
    reason
}

/// The two classification backends behind one interface.
pub enum Classifier {
    /// In-process inference through the model lifecycle manager.
    Local(Arc<ModelManager>),

    /// Upload-and-poll classification against an external endpoint.
    Remote(RemoteClassifier),
}

impl Classifier {
    /// Build the backend selected by configuration.
    pub fn from_config(config: &DetectionConfig) -> Result<Self> {
        match config.backend.as_str() {
            "remote" => Ok(Classifier::Remote(RemoteClassifier::new(config)?)),
            _ => Ok(Classifier::Local(Arc::new(ModelManager::new(
                config.clone(),
            )))),
        }
    }

    /// Classify a prepared sample array.
    ///
    /// Never fails: backend errors are downgraded to `unknown` verdicts with a
    /// bounded diagnostic string.
    pub async fn classify(&self, samples: &[f32], sample_rate: u32) -> Verdict {
        let start = Instant::now();

        let result = match self {
            Classifier::Local(manager) => {
                manager.predict(samples, sample_rate).await.map(|(label, confidence)| {
                    Verdict::new(label, confidence, None, elapsed_ms(start))
                })
            }
            Classifier::Remote(remote) => remote.classify(samples, sample_rate).await,
        };

        match result {
            Ok(verdict) => verdict,
            Err(err) => {
                warn!(error = %err, backend = self.backend_name(), "Classification failed");
                Verdict::failure(&err.to_string(), elapsed_ms(start))
            }
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self {
            Classifier::Local(_) => "local",
            Classifier::Remote(_) => "remote",
        }
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_confidence_is_clamped() {
        let verdict = Verdict::new(AmdLabel::Human, 1.7, None, 10);
        assert_eq!(verdict.confidence, 1.0);

        let verdict = Verdict::new(AmdLabel::Human, -0.3, None, 10);
        assert_eq!(verdict.confidence, 0.0);
    }

    #[test]
    fn test_failure_verdict_shape() {
        let verdict = Verdict::failure("connection reset by peer", 42);
        assert_eq!(verdict.label, AmdLabel::Unknown);
        assert_eq!(verdict.confidence, 0.0);
        assert_eq!(verdict.processing_time_ms, 42);
        assert!(verdict.reasoning.unwrap().contains("connection reset"));
    }

    #[test]
    fn test_reasoning_is_bounded() {
        let long_reason = "x".repeat(500);
        let verdict = Verdict::failure(&long_reason, 1);
        assert!(verdict.reasoning.unwrap().len() <= MAX_REASONING_LEN);
    }

    #[test]
    fn test_reasoning_truncation_respects_char_boundaries() {
        // Multi-byte characters straddling the cut point must not panic.
        let reason = "é".repeat(200);
        let verdict = Verdict::failure(&reason, 1);
        let bounded = verdict.reasoning.unwrap();
        assert!(bounded.len() <= MAX_REASONING_LEN);
    }

    #[test]
    fn test_blocked_verdict() {
        let verdict = Verdict::blocked(7);
        assert_eq!(verdict.label, AmdLabel::Unknown);
        assert_eq!(verdict.confidence, 0.5);
    }

    #[test]
    fn test_label_serialization() {
        assert_eq!(
            serde_json::to_string(&AmdLabel::Voicemail).unwrap(),
            "\"voicemail\""
        );
        assert_eq!(AmdLabel::Human.to_string(), "human");
    }

    #[tokio::test]
    async fn test_local_classify_downgrades_errors() {
        let mut config = crate::config::AppConfig::default().detection;
        config.backend = "stub".to_string();
        let classifier = Classifier::from_config(&config).unwrap();

        // Empty audio makes the stub model error; the classifier converts
        // that into a failure verdict instead of propagating it.
        let verdict = classifier.classify(&[], 16000).await;
        assert_eq!(verdict.label, AmdLabel::Unknown);
        assert_eq!(verdict.confidence, 0.0);
        assert!(verdict.reasoning.is_some());
    }
}
