//! # Candle Backend
//!
//! Implements [`ModelBackend`] on top of candle and the Hugging Face hub.
//!
//! ## What each kind loads:
//! - **Transcription**: a full [`WhisperModel`], ready for inference
//! - **Alignment / Diarization**: the checkpoint's safetensors weights, placed
//!   on the device in the requested dtype
//!
//! ## Teardown:
//! Dropping candle tensors frees their device buffers, so unloading takes the
//! handle out of the [`LoadedModel`] and drops it. Unloading twice is an error.

use crate::cache::{CacheKey, ModelBackend, ModelKind, OptionValue};
use crate::device::DeviceManager;
use crate::transcription::transcript::Transcript;
use crate::transcription::whisper::{Task, WhisperModel};
use anyhow::{anyhow, Context, Result};
use candle_core::{DType, Device, Tensor};
use hf_hub::api::sync::{Api, ApiBuilder};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info};

/// Map a compute precision string to a candle dtype.
pub fn parse_dtype(precision: &str) -> Result<DType> {
    match precision {
        "float32" | "f32" => Ok(DType::F32),
        "float16" | "f16" => Ok(DType::F16),
        "bfloat16" | "bf16" => Ok(DType::BF16),
        other => Err(anyhow!("Unsupported compute type: {}", other)),
    }
}

/// Hub repository for a model name. Bare Whisper sizes map to the official
/// checkpoints; anything containing `/` is already a repository id.
pub fn repo_for(kind: ModelKind, model_name: &str) -> String {
    if model_name.contains('/') {
        return model_name.to_string();
    }
    match kind {
        ModelKind::Transcription => format!("openai/whisper-{}", model_name),
        ModelKind::Alignment | ModelKind::Diarization => model_name.to_string(),
    }
}

/// Weights of a non-Whisper checkpoint resident on a device.
pub struct WeightsBundle {
    tensors: HashMap<String, Tensor>,
}

impl WeightsBundle {
    fn load(api: &Api, repo: &str, device: &Device, dtype: DType) -> Result<Self> {
        let weights_file = api
            .model(repo.to_string())
            .get("model.safetensors")
            .with_context(|| format!("Failed to download model.safetensors from {}", repo))?;

        let tensors = candle_core::safetensors::load(&weights_file, device)?
            .into_iter()
            .map(|(name, tensor)| -> Result<(String, Tensor)> {
                let tensor = if tensor.dtype().is_float() {
                    tensor.to_dtype(dtype)?
                } else {
                    tensor
                };
                Ok((name, tensor))
            })
            .collect::<Result<HashMap<_, _>>>()?;

        Ok(Self { tensors })
    }

    pub fn parameter_count(&self) -> usize {
        self.tensors.values().map(|t| t.elem_count()).sum()
    }
}

pub enum ModelHandle {
    Whisper(WhisperModel),
    Weights(WeightsBundle),
}

/// A model instance as stored in the cache.
///
/// The handle sits behind a mutex because Whisper decoding mutates its
/// key/value caches; concurrent transcriptions on one instance take turns.
pub struct LoadedModel {
    key: CacheKey,
    repo: String,
    handle: Mutex<Option<ModelHandle>>,
}

impl LoadedModel {
    pub fn repo(&self) -> &str {
        &self.repo
    }

    /// Whether `language` can be requested from this model.
    pub fn supports_language(&self, language: &str) -> bool {
        match &*self.handle.lock() {
            Some(ModelHandle::Whisper(model)) => model.language_token(language).is_some(),
            _ => false,
        }
    }

    /// Run transcription. Blocks; call from a blocking thread.
    pub fn transcribe(&self, pcm: &[f32], language: Option<&str>) -> Result<Transcript> {
        let mut handle = self.handle.lock();
        match handle.as_mut() {
            Some(ModelHandle::Whisper(model)) => model.transcribe(pcm, language),
            Some(ModelHandle::Weights(_)) => Err(anyhow!(
                "{} is a {} model and cannot transcribe",
                self.key.model_name(),
                self.key.kind()
            )),
            None => Err(anyhow!("{} has been unloaded", self.key)),
        }
    }

    fn release(&self) -> Result<()> {
        match self.handle.lock().take() {
            Some(ModelHandle::Whisper(_)) => Ok(()),
            Some(ModelHandle::Weights(bundle)) => {
                debug!("Freed {} parameters of {}", bundle.parameter_count(), self.key);
                Ok(())
            }
            None => Err(anyhow!("{} was already unloaded", self.key)),
        }
    }
}

/// Hub access settings.
#[derive(Debug, Clone, Default)]
pub struct HubSettings {
    pub cache_dir: Option<PathBuf>,
    pub token: Option<String>,
}

impl HubSettings {
    /// Settings from configuration, with `HF_TOKEN` and `HF_HUB_CACHE` as
    /// fallbacks.
    pub fn from_env(cache_dir: Option<String>) -> Self {
        Self {
            cache_dir: cache_dir
                .or_else(|| std::env::var("HF_HUB_CACHE").ok())
                .map(PathBuf::from),
            token: std::env::var("HF_TOKEN").ok(),
        }
    }
}

pub struct CandleBackend {
    api: Api,
}

impl CandleBackend {
    pub fn new(settings: HubSettings) -> Result<Self> {
        let mut builder = ApiBuilder::new()
            .with_progress(false)
            .with_token(settings.token);
        if let Some(dir) = settings.cache_dir {
            debug!("Using Hugging Face cache dir {:?}", dir);
            builder = builder.with_cache_dir(dir);
        }
        let api = builder.build().context("Failed to create Hugging Face API client")?;
        Ok(Self { api })
    }

    fn whisper_task(key: &CacheKey) -> Result<Task> {
        match key.extra_options().get("task") {
            None => Ok(Task::Transcribe),
            Some(OptionValue::Str(task)) => task.parse(),
            Some(other) => Err(anyhow!("Option task must be a string, got {}", other)),
        }
    }
}

impl ModelBackend for CandleBackend {
    type Model = LoadedModel;

    fn load(&self, key: &CacheKey) -> Result<LoadedModel> {
        let device = DeviceManager::open(key.device())?;
        let dtype = parse_dtype(key.compute_precision())?;
        let repo = repo_for(key.kind(), key.model_name());

        let handle = match key.kind() {
            ModelKind::Transcription => {
                let task = Self::whisper_task(key)?;
                ModelHandle::Whisper(WhisperModel::load(&self.api, &repo, &device, dtype, task)?)
            }
            ModelKind::Alignment | ModelKind::Diarization => {
                let bundle = WeightsBundle::load(&self.api, &repo, &device, dtype)?;
                info!(
                    "Loaded {} weights for {} ({} parameters)",
                    key.kind(),
                    repo,
                    bundle.parameter_count()
                );
                ModelHandle::Weights(bundle)
            }
        };

        Ok(LoadedModel {
            key: key.clone(),
            repo,
            handle: Mutex::new(Some(handle)),
        })
    }

    fn unload(&self, model: &LoadedModel) -> Result<()> {
        model.release()
    }
}
