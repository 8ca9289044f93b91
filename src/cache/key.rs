//! # Cache Keys
//!
//! A [`CacheKey`] names one distinct, loadable model configuration. Two requests
//! that would construct the same physical resource must produce equal keys, so
//! the key is normalized on construction:
//!
//! - **Extra options** are stored in a `BTreeMap`, which makes them sorted and
//!   therefore independent of the order the caller supplied them in.
//! - **Default-valued options** are dropped, so an explicit `beam_size=5` and an
//!   omitted `beam_size` land in the same cache slot.
//!
//! Model-name defaulting happens in the request layer; the key only ever sees
//! fully resolved parameters.

use crate::cache::error::CacheError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// The category of model. Each kind has an independently keyed cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelKind {
    Transcription,
    Alignment,
    Diarization,
}

impl ModelKind {
    pub const ALL: [ModelKind; 3] = [
        ModelKind::Transcription,
        ModelKind::Alignment,
        ModelKind::Diarization,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ModelKind::Transcription => "transcription",
            ModelKind::Alignment => "alignment",
            ModelKind::Diarization => "diarization",
        }
    }

    /// Documented default values for the extra options of this kind.
    ///
    /// An option given with exactly one of these values is treated as if it
    /// had been omitted.
    pub fn default_options(&self) -> Vec<(&'static str, OptionValue)> {
        match self {
            ModelKind::Transcription => vec![
                ("task", OptionValue::Str("transcribe".to_string())),
                ("beam_size", OptionValue::Int(5)),
            ],
            ModelKind::Alignment => vec![
                ("interpolate_method", OptionValue::Str("nearest".to_string())),
            ],
            ModelKind::Diarization => vec![
                ("segmentation_batch_size", OptionValue::Int(32)),
                ("embedding_batch_size", OptionValue::Int(32)),
            ],
        }
    }

    fn is_default(&self, name: &str, value: &OptionValue) -> bool {
        self.default_options()
            .iter()
            .any(|(default_name, default_value)| *default_name == name && default_value == value)
    }
}

impl fmt::Display for ModelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ModelKind {
    type Err = CacheError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "transcription" | "whisper" | "asr" => Ok(ModelKind::Transcription),
            "alignment" | "align" => Ok(ModelKind::Alignment),
            "diarization" | "diarize" => Ok(ModelKind::Diarization),
            other => Err(CacheError::InvalidKey(format!("unknown model kind '{}'", other))),
        }
    }
}

/// Where a model instance lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceSpec {
    Cpu,
    Gpu(usize),
}

impl fmt::Display for DeviceSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceSpec::Cpu => f.write_str("cpu"),
            DeviceSpec::Gpu(index) => write!(f, "gpu:{}", index),
        }
    }
}

/// Scalar value of an extra option.
///
/// Floats are stored by bit pattern so the key stays `Eq + Hash`; `-0.0` is
/// folded into `0.0` first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OptionValue {
    Bool(bool),
    Int(i64),
    Float(FloatBits),
    Str(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct FloatBits(u64);

impl FloatBits {
    pub fn value(&self) -> f64 {
        f64::from_bits(self.0)
    }
}

impl From<f64> for OptionValue {
    fn from(value: f64) -> Self {
        let value = if value == 0.0 { 0.0 } else { value };
        OptionValue::Float(FloatBits(value.to_bits()))
    }
}

impl From<i64> for OptionValue {
    fn from(value: i64) -> Self {
        OptionValue::Int(value)
    }
}

impl From<bool> for OptionValue {
    fn from(value: bool) -> Self {
        OptionValue::Bool(value)
    }
}

impl From<&str> for OptionValue {
    fn from(value: &str) -> Self {
        OptionValue::Str(value.to_string())
    }
}

impl OptionValue {
    /// Convert a JSON scalar. Arrays, objects and `null` are rejected.
    pub fn from_json(name: &str, value: &serde_json::Value) -> Result<Self, CacheError> {
        match value {
            serde_json::Value::Bool(b) => Ok(OptionValue::Bool(*b)),
            serde_json::Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(OptionValue::Int(i))
                } else if let Some(f) = n.as_f64() {
                    Ok(OptionValue::from(f))
                } else {
                    Err(CacheError::InvalidKey(format!("option '{}' is out of range", name)))
                }
            }
            serde_json::Value::String(s) => Ok(OptionValue::Str(s.clone())),
            _ => Err(CacheError::InvalidKey(format!(
                "option '{}' must be a boolean, number or string",
                name
            ))),
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            OptionValue::Bool(b) => serde_json::Value::Bool(*b),
            OptionValue::Int(i) => serde_json::Value::from(*i),
            OptionValue::Float(bits) => serde_json::Value::from(bits.value()),
            OptionValue::Str(s) => serde_json::Value::String(s.clone()),
        }
    }
}

impl fmt::Display for OptionValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptionValue::Bool(b) => write!(f, "{}", b),
            OptionValue::Int(i) => write!(f, "{}", i),
            OptionValue::Float(bits) => write!(f, "{}", bits.value()),
            OptionValue::Str(s) => write!(f, "{:?}", s),
        }
    }
}

/// Normalized extra options, sorted by name.
pub type ModelOptions = BTreeMap<String, OptionValue>;

/// Parse a JSON object of extra options into [`ModelOptions`].
pub fn options_from_json(
    object: &serde_json::Map<String, serde_json::Value>,
) -> Result<ModelOptions, CacheError> {
    object
        .iter()
        .map(|(name, value)| Ok((name.clone(), OptionValue::from_json(name, value)?)))
        .collect()
}

/// Identifies one distinct, loadable model configuration.
///
/// Fields are private; a key can only be obtained through [`CacheKey::build`],
/// so every key in the system is normalized and validated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    kind: ModelKind,
    model_name: String,
    device: DeviceSpec,
    compute_precision: String,
    extra_options: ModelOptions,
}

impl CacheKey {
    /// Build a normalized key.
    ///
    /// ## Validation:
    /// - `model_name` must be non-empty after trimming
    /// - `compute_precision` must be non-empty
    /// - a GPU index must be below `device_count`
    ///
    /// ## Normalization:
    /// Options equal to the kind's documented default are dropped; the rest are
    /// kept sorted by name.
    pub fn build<I>(
        kind: ModelKind,
        model_name: &str,
        device: DeviceSpec,
        compute_precision: &str,
        extra_options: I,
        device_count: usize,
    ) -> Result<Self, CacheError>
    where
        I: IntoIterator<Item = (String, OptionValue)>,
    {
        let model_name = model_name.trim();
        if model_name.is_empty() {
            return Err(CacheError::InvalidKey("model name must not be empty".to_string()));
        }

        let compute_precision = compute_precision.trim().to_lowercase();
        if compute_precision.is_empty() {
            return Err(CacheError::InvalidKey(
                "compute precision must not be empty".to_string(),
            ));
        }

        if let DeviceSpec::Gpu(index) = device {
            if index >= device_count {
                return Err(CacheError::InvalidKey(format!(
                    "device gpu:{} does not exist ({} GPU(s) available)",
                    index, device_count
                )));
            }
        }

        let extra_options = extra_options
            .into_iter()
            .filter(|(name, value)| !kind.is_default(name, value))
            .collect();

        Ok(Self {
            kind,
            model_name: model_name.to_string(),
            device,
            compute_precision,
            extra_options,
        })
    }

    pub fn kind(&self) -> ModelKind {
        self.kind
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn device(&self) -> DeviceSpec {
        self.device
    }

    pub fn compute_precision(&self) -> &str {
        &self.compute_precision
    }

    pub fn extra_options(&self) -> &ModelOptions {
        &self.extra_options
    }

    /// JSON description used by the model listing endpoints.
    pub fn to_json(&self) -> serde_json::Value {
        let options: serde_json::Map<String, serde_json::Value> = self
            .extra_options
            .iter()
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect();

        serde_json::json!({
            "kind": self.kind,
            "model": self.model_name,
            "device": self.device.to_string(),
            "compute_type": self.compute_precision,
            "options": options,
        })
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}@{}/{}",
            self.kind, self.model_name, self.device, self.compute_precision
        )?;
        if !self.extra_options.is_empty() {
            let options: Vec<String> = self
                .extra_options
                .iter()
                .map(|(name, value)| format!("{}={}", name, value))
                .collect();
            write!(f, "{{{}}}", options.join(","))?;
        }
        Ok(())
    }
}
