//! # Model Lifecycle Manager
//!
//! Lazy, load-once ownership of the local inference model. The model is
//! expensive to load, shared by every session and request in the process, and
//! must be loaded at most once no matter how many callers race on first use.
//!
//! ## Double-Checked Locking:
//! 1. Fast path: an atomic "loaded" flag checked without any lock
//! 2. Slow path: acquire the load mutex, check the flag again (a concurrent
//!    caller may have finished loading while we waited), then load
//!
//! Callers that arrive while a load is in progress block on the same mutex
//! and observe the fully loaded model once it completes. Release/Acquire
//! ordering on the flag guarantees they never see a partially initialized
//! model.
//!
//! ## Failure Semantics:
//! A failed load is returned to that caller only. The manager does not mark
//! itself permanently failed, so the next caller retries the load from
//! scratch.

use crate::config::DetectionConfig;
use crate::detection::classifier::AmdLabel;
use crate::detection::model::AmdModel;
use anyhow::Result;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{Mutex, RwLock};
use tracing::info;

/// Process-wide owner of the local AMD model.
///
/// Constructed once at startup and passed by reference into every session and
/// request handler through the application state.
pub struct ModelManager {
    config: DetectionConfig,
    loaded: AtomicBool,
    model: RwLock<Option<Arc<AmdModel>>>,
    load_lock: Mutex<()>,
    load_count: AtomicU64,
}

impl ModelManager {
    pub fn new(config: DetectionConfig) -> Self {
        Self {
            config,
            loaded: AtomicBool::new(false),
            model: RwLock::new(None),
            load_lock: Mutex::new(()),
            load_count: AtomicU64::new(0),
        }
    }

    /// Whether the model is loaded and ready for inference.
    pub fn is_loaded(&self) -> bool {
        self.loaded.load(Ordering::Acquire)
    }

    /// Get the loaded model, loading it on first use.
    ///
    /// Idempotent: concurrent first callers all block until one load finishes
    /// and then share the same model instance.
    pub async fn ensure_loaded(&self) -> Result<Arc<AmdModel>> {
        if self.loaded.load(Ordering::Acquire) {
            if let Some(model) = self.model.read().await.as_ref() {
                return Ok(model.clone());
            }
        }

        let _guard = self.load_lock.lock().await;

        // Second check: another caller may have completed the load while this
        // one waited for the lock.
        if self.loaded.load(Ordering::Acquire) {
            if let Some(model) = self.model.read().await.as_ref() {
                return Ok(model.clone());
            }
        }

        info!("Loading AMD model on first use...");
        let start = Instant::now();

        let model = Arc::new(AmdModel::load(&self.config).await?);

        *self.model.write().await = Some(model.clone());
        self.loaded.store(true, Ordering::Release);
        self.load_count.fetch_add(1, Ordering::Relaxed);

        info!(
            elapsed_s = start.elapsed().as_secs_f64(),
            "Model loaded and ready"
        );

        Ok(model)
    }

    /// Classify a prepared sample array, loading the model first if needed.
    pub async fn predict(&self, samples: &[f32], sample_rate: u32) -> Result<(AmdLabel, f32)> {
        let model = self.ensure_loaded().await?;
        model.predict(samples, sample_rate)
    }

    /// Name of the loaded model, if any.
    pub async fn model_name(&self) -> Option<String> {
        self.model.read().await.as_ref().map(|m| m.name())
    }

    /// Number of loads that actually executed (diagnostics).
    pub fn load_count(&self) -> u64 {
        self.load_count.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;

    fn stub_config() -> DetectionConfig {
        let mut config = AppConfig::default().detection;
        config.backend = "stub".to_string();
        config
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_first_callers_load_once() {
        let manager = Arc::new(ModelManager::new(stub_config()));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move {
                manager.ensure_loaded().await.map(|_| ())
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap().is_ok());
        }

        assert!(manager.is_loaded());
        assert_eq!(manager.load_count(), 1);
    }

    #[tokio::test]
    async fn test_predict_triggers_lazy_load() {
        let manager = ModelManager::new(stub_config());
        assert!(!manager.is_loaded());

        let samples = vec![0.3f32; 8000];
        let (label, confidence) = manager.predict(&samples, 16000).await.unwrap();
        assert_eq!(label, AmdLabel::Human);
        assert!(confidence > 0.0);
        assert!(manager.is_loaded());
        assert_eq!(manager.model_name().await.as_deref(), Some("stub"));
    }

    #[tokio::test]
    async fn test_failed_load_is_not_cached() {
        // Local backend with no repository configured fails before any
        // network access.
        let mut config = stub_config();
        config.backend = "local".to_string();
        config.model_repo = String::new();

        let manager = ModelManager::new(config);
        assert!(manager.ensure_loaded().await.is_err());
        assert!(!manager.is_loaded());
        assert_eq!(manager.load_count(), 0);

        // The failure is not permanent: the next call retries and fails the
        // same way instead of returning a cached error.
        assert!(manager.ensure_loaded().await.is_err());
        assert!(!manager.is_loaded());
    }
}
