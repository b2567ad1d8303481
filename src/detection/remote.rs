//! # Remote Classifier Backend
//!
//! Classification against an external file-processing AI endpoint. The flow
//! mirrors how those APIs want to be driven:
//!
//! 1. Upload the audio as a WAV file (multipart POST)
//! 2. Poll the file status while the remote side reports `"processing"`
//! 3. Issue one classification request with the file handle
//! 4. Delete the uploaded file, on success and failure alike
//!
//! There is no poll attempt limit: only a terminal `"failed"` state breaks the
//! wait. Per-request timeouts still bound each individual HTTP call.

use crate::audio::processor;
use crate::config::DetectionConfig;
use crate::detection::classifier::{AmdLabel, Verdict};
use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Client for the remote upload-and-poll classification endpoint.
pub struct RemoteClassifier {
    client: reqwest::Client,
    endpoint: String,
    poll_interval: Duration,
}

/// File handle returned by the upload endpoint.
#[derive(Debug, Deserialize)]
struct RemoteFile {
    id: String,
    #[serde(default)]
    state: String,
}

/// Classification payload returned by the remote endpoint.
///
/// Every field is optional: responses stripped by content policy filters come
/// back with no classification at all.
#[derive(Debug, Deserialize)]
struct RemoteClassification {
    classification: Option<String>,
    confidence: Option<f32>,
    reasoning: Option<String>,
}

impl RemoteClassifier {
    pub fn new(config: &DetectionConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self {
            client,
            endpoint: config.remote_endpoint.trim_end_matches('/').to_string(),
            poll_interval: Duration::from_millis(config.poll_interval_ms),
        })
    }

    /// Whether the backend has an endpoint and an API key to work with.
    pub fn is_configured(&self) -> bool {
        !self.endpoint.is_empty() && DetectionConfig::remote_api_key().is_some()
    }

    /// Run the full upload → poll → classify → delete cycle.
    pub async fn classify(&self, samples: &[f32], sample_rate: u32) -> Result<Verdict> {
        let start = Instant::now();

        let api_key = DetectionConfig::remote_api_key()
            .ok_or_else(|| anyhow!("Remote API key not configured"))?;
        if self.endpoint.is_empty() {
            return Err(anyhow!("Remote endpoint not configured"));
        }

        let wav_bytes = processor::encode_wav(samples, sample_rate)?;
        let file = self.upload(&api_key, wav_bytes).await?;
        debug!(file_id = %file.id, "Audio uploaded for remote classification");

        // The uploaded file is deleted whatever the classification outcome.
        let outcome = self.classify_uploaded(&api_key, &file.id, start).await;

        if let Err(err) = self.delete_file(&api_key, &file.id).await {
            warn!(file_id = %file.id, error = %err, "Failed to delete uploaded audio");
        }

        outcome
    }

    async fn upload(&self, api_key: &str, wav_bytes: Vec<u8>) -> Result<RemoteFile> {
        let part = reqwest::multipart::Part::bytes(wav_bytes)
            .file_name(format!("call_{}.wav", uuid::Uuid::new_v4()))
            .mime_str("audio/wav")?;
        let form = reqwest::multipart::Form::new().part("file", part);

        let response = self
            .client
            .post(format!("{}/files", self.endpoint))
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("Upload failed with status {}", response.status()));
        }

        Ok(response.json().await?)
    }

    async fn classify_uploaded(
        &self,
        api_key: &str,
        file_id: &str,
        start: Instant,
    ) -> Result<Verdict> {
        self.wait_until_processed(api_key, file_id).await?;

        let response = self
            .client
            .post(format!("{}/classify", self.endpoint))
            .bearer_auth(api_key)
            .json(&serde_json::json!({ "file_id": file_id }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "Classification request failed with status {}",
                response.status()
            ));
        }

        let body: RemoteClassification = response.json().await?;
        let elapsed = start.elapsed().as_millis() as u64;

        let Some(classification) = body.classification else {
            // Content policy filters stripped the response; undecided rather
            // than an error.
            warn!(file_id, "Remote response carried no classification");
            return Ok(Verdict::blocked(elapsed));
        };

        Ok(Verdict::new(
            map_label(&classification),
            body.confidence.unwrap_or(0.5),
            body.reasoning,
            elapsed,
        ))
    }

    /// Poll until the remote side stops reporting `"processing"`.
    async fn wait_until_processed(&self, api_key: &str, file_id: &str) -> Result<()> {
        loop {
            let response = self
                .client
                .get(format!("{}/files/{}", self.endpoint, file_id))
                .bearer_auth(api_key)
                .send()
                .await?;

            if !response.status().is_success() {
                return Err(anyhow!(
                    "File status check failed with status {}",
                    response.status()
                ));
            }

            let file: RemoteFile = response.json().await?;
            match file.state.as_str() {
                "processing" => tokio::time::sleep(self.poll_interval).await,
                "failed" => return Err(anyhow!("Remote audio processing failed")),
                _ => return Ok(()),
            }
        }
    }

    async fn delete_file(&self, api_key: &str, file_id: &str) -> Result<()> {
        let response = self
            .client
            .delete(format!("{}/files/{}", self.endpoint, file_id))
            .bearer_auth(api_key)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(anyhow!("Delete failed with status {}", response.status()));
        }

        Ok(())
    }
}

/// Map the remote label vocabulary onto ours.
fn map_label(classification: &str) -> AmdLabel {
    match classification.to_uppercase().as_str() {
        "HUMAN" => AmdLabel::Human,
        "MACHINE" | "VOICEMAIL" => AmdLabel::Voicemail,
        _ => AmdLabel::Unknown,
    }
}
