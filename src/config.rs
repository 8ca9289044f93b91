//! # Configuration Management
//!
//! Loads application configuration from layered sources:
//! - built-in defaults (the `Default` impl below)
//! - an optional `config.toml` in the working directory
//! - environment variables prefixed with `APP_`
//!
//! ## Configuration Priority (highest to lowest):
//! 1. `HOST` / `PORT` (set by most deployment platforms)
//! 2. Environment variables, `APP_` prefix and `__` between nesting levels
//!    (`APP_MODELS__COMPUTE_TYPE=float16`, `APP_AUDIO__MAX_UPLOAD_MB=50`)
//! 3. `config.toml`
//! 4. Defaults
//!
//! A double underscore separates nesting levels because field names such as
//! `compute_type` already contain single underscores.

use crate::cache::ModelKind;
use crate::device::DevicePreference;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub models: ModelsConfig,
    pub audio: AudioConfig,
    pub performance: PerformanceConfig,
}

/// Where the HTTP server binds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Defaults applied when a request leaves model parameters out.
///
/// ## Fields:
/// - `transcription_model` / `alignment_model` / `diarization_model`: model
///   used for each kind when the request names none. Whisper sizes (`base`,
///   `large-v3`, ...) or full Hugging Face repository ids.
/// - `device`: `auto`, `cpu`, `cuda`, `gpu:N` or `metal`
/// - `gpu_count`: pin the number of addressable GPUs instead of probing
/// - `compute_type`: `float32`, `float16` or `bfloat16`
/// - `default_language`: transcription language when the request has none;
///   unset means the model's own default
/// - `hf_cache_dir`: override the Hugging Face cache location
/// - `preload`: models to load at startup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelsConfig {
    pub transcription_model: String,
    pub alignment_model: String,
    pub diarization_model: String,
    pub device: String,
    pub gpu_count: Option<usize>,
    pub compute_type: String,
    pub default_language: Option<String>,
    pub hf_cache_dir: Option<String>,
    pub preload: Vec<PreloadEntry>,
}

/// A model warmed at startup. Missing fields fall back to the defaults above.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreloadEntry {
    pub kind: String,
    pub model: Option<String>,
    pub device: Option<String>,
    pub compute_type: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    /// Uploads must already be at this rate.
    pub sample_rate: u32,
    pub max_upload_mb: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PerformanceConfig {
    /// Upper bound on transcriptions running at once, across all models.
    pub max_concurrent_transcriptions: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            models: ModelsConfig {
                transcription_model: "base".to_string(),
                alignment_model: "facebook/wav2vec2-base-960h".to_string(),
                diarization_model: "pyannote/speaker-diarization-3.1".to_string(),
                device: "auto".to_string(),
                gpu_count: None,
                compute_type: "float32".to_string(),
                default_language: None,
                hf_cache_dir: None,
                preload: Vec::new(),
            },
            audio: AudioConfig {
                sample_rate: 16_000,
                max_upload_mb: 25,
            },
            performance: PerformanceConfig {
                max_concurrent_transcriptions: 4,
            },
        }
    }
}

impl ModelsConfig {
    pub fn default_model(&self, kind: ModelKind) -> &str {
        match kind {
            ModelKind::Transcription => &self.transcription_model,
            ModelKind::Alignment => &self.alignment_model,
            ModelKind::Diarization => &self.diarization_model,
        }
    }

    pub fn device_preference(&self) -> Result<DevicePreference> {
        self.device.parse().map_err(|e: String| anyhow::anyhow!(e))
    }
}

impl AppConfig {
    /// Load configuration from all sources in priority order.
    pub fn load() -> Result<Self> {
        let mut settings = config::Config::builder()
            .add_source(config::Config::try_from(&AppConfig::default())?)
            .add_source(config::File::with_name("config").required(false))
            .add_source(
                config::Environment::with_prefix("APP")
                    .prefix_separator("_")
                    .separator("__"),
            );

        if let Ok(host) = env::var("HOST") {
            settings = settings.set_override("server.host", host)?;
        }

        if let Ok(port) = env::var("PORT") {
            settings = settings.set_override("server.port", port)?;
        }

        let config: AppConfig = settings.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.server.port == 0 {
            return Err(anyhow::anyhow!("Server port cannot be 0"));
        }

        for kind in ModelKind::ALL {
            if self.models.default_model(kind).trim().is_empty() {
                return Err(anyhow::anyhow!("Default {} model cannot be empty", kind));
            }
        }

        self.models.device_preference()?;

        if !matches!(
            self.models.compute_type.to_lowercase().as_str(),
            "float32" | "float16" | "bfloat16"
        ) {
            return Err(anyhow::anyhow!(
                "Unsupported compute type '{}' (expected float32, float16 or bfloat16)",
                self.models.compute_type
            ));
        }

        for entry in &self.models.preload {
            entry
                .kind
                .parse::<ModelKind>()
                .map_err(|e| anyhow::anyhow!("Invalid preload entry: {}", e))?;
        }

        if self.audio.sample_rate == 0 {
            return Err(anyhow::anyhow!("Audio sample rate must be greater than 0"));
        }

        if self.audio.max_upload_mb == 0 {
            return Err(anyhow::anyhow!("Max upload size must be greater than 0"));
        }

        if self.performance.max_concurrent_transcriptions == 0 {
            return Err(anyhow::anyhow!(
                "Max concurrent transcriptions must be greater than 0"
            ));
        }

        Ok(())
    }

    /// Apply a partial JSON update, e.g. `{"models": {"compute_type": "float16"}}`.
    ///
    /// Fields that only matter at startup (`server`, `models.gpu_count`,
    /// `models.hf_cache_dir`, `models.preload`) are not updatable here. The
    /// result is validated; on failure `self` is left unchanged.
    pub fn update_from_json(&mut self, json_str: &str) -> Result<()> {
        let partial: serde_json::Value = serde_json::from_str(json_str)?;
        let mut updated = self.clone();

        if let Some(models) = partial.get("models") {
            let string_fields: [(&str, &mut String); 5] = [
                ("transcription_model", &mut updated.models.transcription_model),
                ("alignment_model", &mut updated.models.alignment_model),
                ("diarization_model", &mut updated.models.diarization_model),
                ("device", &mut updated.models.device),
                ("compute_type", &mut updated.models.compute_type),
            ];
            for (name, field) in string_fields {
                if let Some(value) = models.get(name).and_then(|v| v.as_str()) {
                    *field = value.to_string();
                }
            }

            match models.get("default_language") {
                Some(serde_json::Value::Null) => updated.models.default_language = None,
                Some(value) => {
                    if let Some(language) = value.as_str() {
                        updated.models.default_language = Some(language.to_string());
                    }
                }
                None => {}
            }
        }

        if let Some(audio) = partial.get("audio") {
            if let Some(rate) = audio.get("sample_rate").and_then(|v| v.as_u64()) {
                updated.audio.sample_rate = u32::try_from(rate)
                    .map_err(|_| anyhow::anyhow!("sample_rate {} is out of range", rate))?;
            }
            if let Some(limit) = audio.get("max_upload_mb").and_then(|v| v.as_u64()) {
                updated.audio.max_upload_mb = usize::try_from(limit)
                    .map_err(|_| anyhow::anyhow!("max_upload_mb {} is out of range", limit))?;
            }
        }

        if let Some(performance) = partial.get("performance") {
            if let Some(limit) = performance
                .get("max_concurrent_transcriptions")
                .and_then(|v| v.as_u64())
            {
                updated.performance.max_concurrent_transcriptions = usize::try_from(limit)
                    .map_err(|_| anyhow::anyhow!("max_concurrent_transcriptions {} is out of range", limit))?;
            }
        }

        updated.validate()?;
        *self = updated;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.models.default_model(ModelKind::Transcription), "base");
        assert_eq!(config.audio.sample_rate, 16_000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_validation() {
        let mut config = AppConfig::default();
        config.server.port = 0;
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.models.compute_type = "int3".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.models.device = "tpu".to_string();
        assert!(config.validate().is_err());

        let mut config = AppConfig::default();
        config.models.preload.push(PreloadEntry {
            kind: "translation".to_string(),
            model: None,
            device: None,
            compute_type: None,
        });
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_update() {
        let mut config = AppConfig::default();
        let json = r#"{"models": {"compute_type": "float16", "default_language": "de"}, "audio": {"max_upload_mb": 50}}"#;
        assert!(config.update_from_json(json).is_ok());
        assert_eq!(config.models.compute_type, "float16");
        assert_eq!(config.models.default_language.as_deref(), Some("de"));
        assert_eq!(config.audio.max_upload_mb, 50);
        assert_eq!(config.models.transcription_model, "base");

        assert!(config
            .update_from_json(r#"{"models": {"default_language": null}}"#)
            .is_ok());
        assert!(config.models.default_language.is_none());
    }

    #[test]
    fn test_invalid_update_leaves_config_unchanged() {
        let mut config = AppConfig::default();
        let json = r#"{"models": {"compute_type": "float16"}, "performance": {"max_concurrent_transcriptions": 0}}"#;
        assert!(config.update_from_json(json).is_err());
        assert_eq!(config.models.compute_type, "float32");
        assert_eq!(config.performance.max_concurrent_transcriptions, 4);
    }

    #[test]
    fn test_out_of_range_sample_rate_is_rejected() {
        let mut config = AppConfig::default();
        // 2^32 + 16000 would wrap to a valid 16 kHz if truncated.
        let err = config
            .update_from_json(r#"{"audio": {"sample_rate": 4294983296}}"#)
            .unwrap_err();
        assert!(err.to_string().contains("out of range"));
        assert_eq!(config.audio.sample_rate, 16_000);
    }

    #[test]
    fn test_server_section_is_not_updatable() {
        let mut config = AppConfig::default();
        assert!(config.update_from_json(r#"{"server": {"port": 9090}}"#).is_ok());
        assert_eq!(config.server.port, 8080);
    }
}
