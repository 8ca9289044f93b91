//! # Application State
//!
//! Everything the HTTP handlers share, handed to actix as `web::Data<AppState>`.
//!
//! ## Sharing pattern:
//! - **Configuration / metrics**: `Arc<RwLock<T>>` from `parking_lot`, whose
//!   guards cannot be poisoned, so reads need no `unwrap`
//! - **Model lifecycle**: one [`LifecycleCoordinator`] created at startup and
//!   injected here; there is no global model registry
//! - **Transcription limit**: a semaphore bounding concurrent inference

use crate::cache::LifecycleCoordinator;
use crate::config::AppConfig;
use crate::transcription::CandleBackend;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tracing::info;

pub type ModelCoordinator = LifecycleCoordinator<CandleBackend>;

#[derive(Clone)]
pub struct AppState {
    /// Runtime-updatable configuration.
    pub config: Arc<RwLock<AppConfig>>,

    pub metrics: Arc<RwLock<AppMetrics>>,

    pub models: Arc<ModelCoordinator>,

    /// Permits for running transcriptions.
    pub transcriptions: Arc<Semaphore>,

    /// Current size of `transcriptions`.
    transcription_limit: Arc<Mutex<usize>>,

    pub start_time: Instant,
}

/// Request metrics collected by the metrics middleware.
#[derive(Debug, Default, Clone)]
pub struct AppMetrics {
    pub request_count: u64,
    pub error_count: u64,
    /// Transcriptions currently holding a permit.
    pub active_transcriptions: u32,
    /// Keyed by `"METHOD /route/pattern"`.
    pub endpoint_metrics: HashMap<String, EndpointMetric>,
}

#[derive(Debug, Default, Clone)]
pub struct EndpointMetric {
    pub request_count: u64,
    pub total_duration_ms: u64,
    pub error_count: u64,
}

impl AppState {
    pub fn new(config: AppConfig, models: ModelCoordinator) -> Self {
        let limit = config.performance.max_concurrent_transcriptions;
        Self {
            config: Arc::new(RwLock::new(config)),
            metrics: Arc::new(RwLock::new(AppMetrics::default())),
            models: Arc::new(models),
            transcriptions: Arc::new(Semaphore::new(limit)),
            transcription_limit: Arc::new(Mutex::new(limit)),
            start_time: Instant::now(),
        }
    }

    /// Snapshot of the current configuration.
    pub fn get_config(&self) -> AppConfig {
        self.config.read().clone()
    }

    /// Replace the configuration and apply the parts that take effect at runtime.
    pub fn update_config(&self, new_config: AppConfig) -> anyhow::Result<()> {
        new_config.validate()?;
        let limit = new_config.performance.max_concurrent_transcriptions;
        *self.config.write() = new_config;
        self.resize_transcription_limit(limit);
        Ok(())
    }

    /// Grow or shrink the transcription semaphore to `limit` permits.
    ///
    /// Shrinking waits for running transcriptions to return their permits, in
    /// a background task.
    fn resize_transcription_limit(&self, limit: usize) {
        let mut current = self.transcription_limit.lock();
        if limit > *current {
            self.transcriptions.add_permits(limit - *current);
        } else if limit < *current {
            let surplus = (*current - limit) as u32;
            let semaphore = Arc::clone(&self.transcriptions);
            tokio::spawn(async move {
                if let Ok(permits) = semaphore.acquire_many_owned(surplus).await {
                    permits.forget();
                }
            });
        } else {
            return;
        }
        info!("Transcription limit changed from {} to {}", *current, limit);
        *current = limit;
    }

    pub fn transcription_limit(&self) -> usize {
        *self.transcription_limit.lock()
    }

    pub fn increment_request_count(&self) {
        self.metrics.write().request_count += 1;
    }

    pub fn increment_error_count(&self) {
        self.metrics.write().error_count += 1;
    }

    pub fn record_endpoint_request(&self, endpoint: &str, duration_ms: u64, is_error: bool) {
        let mut metrics = self.metrics.write();
        let endpoint_metric = metrics.endpoint_metrics.entry(endpoint.to_string()).or_default();
        endpoint_metric.request_count += 1;
        endpoint_metric.total_duration_ms += duration_ms;
        if is_error {
            endpoint_metric.error_count += 1;
        }
    }

    /// Count a transcription as active until the returned guard is dropped.
    pub fn track_transcription(&self) -> ActiveTranscription {
        self.metrics.write().active_transcriptions += 1;
        ActiveTranscription {
            metrics: Arc::clone(&self.metrics),
        }
    }

    pub fn get_metrics_snapshot(&self) -> AppMetrics {
        self.metrics.read().clone()
    }

    pub fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }
}

/// Decrements `active_transcriptions` on drop, including when the request
/// future is dropped mid-inference.
pub struct ActiveTranscription {
    metrics: Arc<RwLock<AppMetrics>>,
}

impl Drop for ActiveTranscription {
    fn drop(&mut self) {
        let mut metrics = self.metrics.write();
        metrics.active_transcriptions = metrics.active_transcriptions.saturating_sub(1);
    }
}

impl EndpointMetric {
    pub fn average_duration_ms(&self) -> f64 {
        if self.request_count > 0 {
            self.total_duration_ms as f64 / self.request_count as f64
        } else {
            0.0
        }
    }

    /// Fraction of requests that failed, `0.0..=1.0`.
    pub fn error_rate(&self) -> f64 {
        if self.request_count > 0 {
            self.error_count as f64 / self.request_count as f64
        } else {
            0.0
        }
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::transcription::{CandleBackend, HubSettings};

    /// State with a real backend that is never asked to load anything.
    pub fn test_state(config: AppConfig) -> AppState {
        let backend = CandleBackend::new(HubSettings {
            cache_dir: Some(std::env::temp_dir().join("whisper-api-backend-tests")),
            token: None,
        })
        .unwrap();
        let gpu_count = config.models.gpu_count.unwrap_or(0);
        AppState::new(config, LifecycleCoordinator::new(backend, gpu_count))
    }
}
