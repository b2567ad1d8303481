//! # AMD Model Management
//!
//! Loading and inference for the local answering-machine-detection model using
//! Candle. The network is a small convolutional classifier over the raw
//! waveform: two strided conv layers, mean pooling over time, and a two-class
//! head (human vs. voicemail).
//!
//! ## Model Loading Process:
//! 1. Download `model.safetensors` from HuggingFace if not cached locally
//! 2. Memory-map the weights into a Candle VarBuilder
//! 3. Build the layers on the target device (CPU)
//!
//! A stub variant exists for development and tests: it produces deterministic
//! verdicts from the audio itself so the full pipeline can be exercised
//! end-to-end without downloading anything.

use crate::config::DetectionConfig;
use crate::detection::classifier::AmdLabel;
use anyhow::{anyhow, Result};
use candle_core::{DType, Device, Tensor, D};
use candle_nn::ops::softmax;
use candle_nn::{conv1d, linear, Conv1d, Conv1dConfig, Linear, Module, VarBuilder};
use std::time::Duration;
use tracing::{debug, info};

/// A loaded AMD model ready for inference.
pub enum AmdModel {
    Candle(CandleAmdModel),
    Stub(StubAmdModel),
}

impl AmdModel {
    /// Load the model selected by configuration.
    ///
    /// The `"stub"` backend skips the download entirely; everything else pulls
    /// weights from the configured HuggingFace repository.
    pub async fn load(config: &DetectionConfig) -> Result<Self> {
        match config.backend.as_str() {
            "stub" => Ok(AmdModel::Stub(StubAmdModel::warm_up().await)),
            _ => Ok(AmdModel::Candle(
                CandleAmdModel::load(&config.model_repo).await?,
            )),
        }
    }

    /// Run inference on a prepared sample array.
    pub fn predict(&self, samples: &[f32], sample_rate: u32) -> Result<(AmdLabel, f32)> {
        match self {
            AmdModel::Candle(model) => model.predict(samples),
            AmdModel::Stub(model) => model.predict(samples, sample_rate),
        }
    }

    pub fn name(&self) -> String {
        match self {
            AmdModel::Candle(model) => model.repo.clone(),
            AmdModel::Stub(_) => "stub".to_string(),
        }
    }
}

/// Convolutional waveform classifier backed by Candle.
#[derive(Debug)]
pub struct CandleAmdModel {
    device: Device,
    conv1: Conv1d,
    conv2: Conv1d,
    head: Linear,
    repo: String,
}

impl CandleAmdModel {
    /// Download weights from HuggingFace and build the network.
    pub async fn load(model_repo: &str) -> Result<Self> {
        if model_repo.is_empty() {
            return Err(anyhow!("Model repository not configured"));
        }

        info!(repo = model_repo, "Loading AMD model weights...");
        let start = std::time::Instant::now();

        let device = Device::Cpu;
        let api = hf_hub::api::tokio::Api::new()?;
        let repo = api.model(model_repo.to_string());
        let weights = repo.get("model.safetensors").await?;

        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights], DType::F32, &device)? };

        let conv1 = conv1d(
            1,
            32,
            11,
            Conv1dConfig {
                padding: 5,
                stride: 5,
                ..Default::default()
            },
            vb.pp("conv1"),
        )?;
        let conv2 = conv1d(
            32,
            64,
            5,
            Conv1dConfig {
                padding: 2,
                stride: 2,
                ..Default::default()
            },
            vb.pp("conv2"),
        )?;
        let head = linear(64, 2, vb.pp("classifier"))?;

        info!(
            repo = model_repo,
            elapsed_s = start.elapsed().as_secs_f64(),
            "AMD model loaded"
        );

        Ok(Self {
            device,
            conv1,
            conv2,
            head,
            repo: model_repo.to_string(),
        })
    }

    /// Forward pass: waveform → class probabilities → (label, confidence).
    fn predict(&self, samples: &[f32]) -> Result<(AmdLabel, f32)> {
        if samples.is_empty() {
            return Err(anyhow!("Empty audio array"));
        }

        let input = Tensor::from_vec(samples.to_vec(), (1, 1, samples.len()), &self.device)?;
        let x = self.conv1.forward(&input)?.relu()?;
        let x = self.conv2.forward(&x)?.relu()?;
        let pooled = x.mean(D::Minus1)?;
        let logits = self.head.forward(&pooled)?;
        let probs = softmax(&logits, D::Minus1)?.squeeze(0)?.to_vec1::<f32>()?;

        // Output ordering follows the model card: index 0 = human, 1 = voicemail.
        let (index, confidence) = probs
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.partial_cmp(b.1).unwrap_or(std::cmp::Ordering::Equal))
            .map(|(i, c)| (i, *c))
            .unwrap_or((0, 0.0));

        let label = if index == 0 {
            AmdLabel::Human
        } else {
            AmdLabel::Voicemail
        };

        debug!(?label, confidence, "Inference complete");
        Ok((label, confidence))
    }
}

/// Placeholder model that derives deterministic verdicts from the audio
/// itself, with no weights and no network access.
///
/// The heuristic leans on call-answer shape: a short burst of speech reads as
/// an interactive greeting ("Hello?"), sustained continuous speech reads as a
/// recorded message, and near-silence is undecidable.
pub struct StubAmdModel;

impl StubAmdModel {
    /// Simulated warm-up latency so concurrent first callers exercise the
    /// same lifecycle path as a real load.
    pub async fn warm_up() -> Self {
        tokio::time::sleep(Duration::from_millis(25)).await;
        debug!("StubAmdModel::warm_up complete");
        Self
    }

    pub fn predict(&self, samples: &[f32], sample_rate: u32) -> Result<(AmdLabel, f32)> {
        if samples.is_empty() {
            return Err(anyhow!("Empty audio array"));
        }

        let sum_squares: f64 = samples.iter().map(|s| (*s as f64) * (*s as f64)).sum();
        let rms = (sum_squares / samples.len() as f64).sqrt() as f32;
        let duration_secs = samples.len() as f64 / sample_rate as f64;

        if rms < 0.01 {
            return Ok((AmdLabel::Unknown, 0.5));
        }

        if duration_secs > 2.5 {
            Ok((AmdLabel::Voicemail, 0.8))
        } else {
            Ok((AmdLabel::Human, 0.8))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_stub_predict_is_deterministic() {
        let model = StubAmdModel::warm_up().await;

        // Half a second of audible tone: short burst, reads as human.
        let short: Vec<f32> = vec![0.3; 8000];
        let (label, confidence) = model.predict(&short, 16000).unwrap();
        assert_eq!(label, AmdLabel::Human);
        assert!(confidence > 0.5);

        // Four seconds of sustained speech energy: reads as a recording.
        let long: Vec<f32> = vec![0.3; 64000];
        let (label, _) = model.predict(&long, 16000).unwrap();
        assert_eq!(label, AmdLabel::Voicemail);

        // Near-silence is undecidable.
        let quiet: Vec<f32> = vec![0.001; 16000];
        let (label, confidence) = model.predict(&quiet, 16000).unwrap();
        assert_eq!(label, AmdLabel::Unknown);
        assert_eq!(confidence, 0.5);
    }

    #[tokio::test]
    async fn test_stub_rejects_empty_audio() {
        let model = StubAmdModel::warm_up().await;
        assert!(model.predict(&[], 16000).is_err());
    }

    #[tokio::test]
    async fn test_candle_load_requires_repo() {
        let err = CandleAmdModel::load("").await.unwrap_err();
        assert!(err.to_string().contains("not configured"));
    }
}
