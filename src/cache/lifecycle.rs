//! Lifecycle coordination between the per-kind caches and the ML backend.
//!
//! The coordinator owns one [`ModelCache`] per [`ModelKind`] and supplies the
//! initializer and teardown closures they call. It keeps no cache state of its
//! own.

use crate::cache::error::CacheError;
use crate::cache::key::{CacheKey, DeviceSpec, ModelKind, OptionValue};
use crate::cache::model_cache::{ModelCache, ModelLease, ResidentModel, TeardownFn};
use futures_util::future::join_all;
use std::sync::Arc;
use tracing::info;

/// The ML-library boundary. Both calls block and may take a long time.
pub trait ModelBackend: Send + Sync + 'static {
    type Model: Send + Sync + 'static;

    /// Construct the model named by `key` on its device with its precision.
    fn load(&self, key: &CacheKey) -> anyhow::Result<Self::Model>;

    /// Move the model off its device and free it.
    fn unload(&self, model: &Self::Model) -> anyhow::Result<()>;
}

/// Administrative unload selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnloadTarget {
    Kind(ModelKind),
    All,
}

impl UnloadTarget {
    fn matches(&self, key: &CacheKey) -> bool {
        match self {
            UnloadTarget::Kind(kind) => key.kind() == *kind,
            UnloadTarget::All => true,
        }
    }
}

pub struct LifecycleCoordinator<B: ModelBackend> {
    backend: Arc<B>,
    transcription: ModelCache<B::Model>,
    alignment: ModelCache<B::Model>,
    diarization: ModelCache<B::Model>,
    device_count: usize,
}

impl<B: ModelBackend> LifecycleCoordinator<B> {
    /// `device_count` is the number of GPUs keys may address.
    pub fn new(backend: B, device_count: usize) -> Self {
        let backend = Arc::new(backend);
        let teardown: TeardownFn<B::Model> = {
            let backend = Arc::clone(&backend);
            Arc::new(move |model: &B::Model| backend.unload(model))
        };

        Self {
            transcription: ModelCache::new("transcription", Arc::clone(&teardown)),
            alignment: ModelCache::new("alignment", Arc::clone(&teardown)),
            diarization: ModelCache::new("diarization", teardown),
            backend,
            device_count,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn device_count(&self) -> usize {
        self.device_count
    }

    fn cache(&self, kind: ModelKind) -> &ModelCache<B::Model> {
        match kind {
            ModelKind::Transcription => &self.transcription,
            ModelKind::Alignment => &self.alignment,
            ModelKind::Diarization => &self.diarization,
        }
    }

    /// Build a validated key against this coordinator's device count.
    pub fn make_key<I>(
        &self,
        kind: ModelKind,
        model_name: &str,
        device: DeviceSpec,
        compute_precision: &str,
        extra_options: I,
    ) -> Result<CacheKey, CacheError>
    where
        I: IntoIterator<Item = (String, OptionValue)>,
    {
        CacheKey::build(
            kind,
            model_name,
            device,
            compute_precision,
            extra_options,
            self.device_count,
        )
    }

    /// Check out the instance for `key`, loading it on a blocking thread if
    /// it is cold.
    pub async fn acquire(&self, key: &CacheKey) -> Result<ModelLease<B::Model>, CacheError> {
        let backend = Arc::clone(&self.backend);
        let load_key = key.clone();
        self.cache(key.kind())
            .acquire(key, move || async move {
                tokio::task::spawn_blocking(move || backend.load(&load_key))
                    .await
                    .map_err(|e| anyhow::anyhow!("model loader panicked: {}", e))?
            })
            .await
    }

    pub async fn release(&self, key: &CacheKey) -> bool {
        self.cache(key.kind()).release(key).await
    }

    /// Release every resident key selected by `target`. Returns the count.
    pub async fn release_target(&self, target: UnloadTarget) -> usize {
        let released: usize = join_all(
            ModelKind::ALL
                .iter()
                .map(|kind| self.cache(*kind).release_all(|key| target.matches(key))),
        )
        .await
        .into_iter()
        .sum();

        info!(?target, released, "administrative unload finished");
        released
    }

    /// Resident instances across all kinds, sorted by key.
    pub fn resident(&self) -> Vec<ResidentModel> {
        let mut models: Vec<ResidentModel> = ModelKind::ALL
            .iter()
            .flat_map(|kind| self.cache(*kind).resident())
            .collect();
        models.sort_by(|a, b| a.key.cmp(&b.key));
        models
    }

    pub fn is_resident(&self, key: &CacheKey) -> bool {
        self.cache(key.kind()).contains(key)
    }
}
