//! # Device Selection
//!
//! Turns the device strings found in configuration and requests (`auto`, `cpu`,
//! `cuda:1`, ...) into a [`DeviceSpec`] for the cache key, and a [`DeviceSpec`]
//! into a concrete candle [`Device`] when a model is loaded.
//!
//! ## GPU discovery:
//! CUDA devices are counted by probing indices until one fails; without CUDA a
//! single Metal device is used if present. The count is detected once and
//! cached, unless configuration pins it.

use crate::cache::DeviceSpec;
use anyhow::{Context, Result};
use candle_core::Device;
use std::sync::OnceLock;
use tracing::{debug, info};

/// Probing stops here even if more devices answer.
const MAX_PROBED_GPUS: usize = 16;

static DETECTED_GPUS: OnceLock<usize> = OnceLock::new();

/// Requested placement before it is resolved against the machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DevicePreference {
    /// First GPU if there is one, otherwise CPU.
    #[default]
    Auto,
    Cpu,
    /// A specific GPU, or the first one if no index was given.
    Gpu(Option<usize>),
}

impl std::str::FromStr for DevicePreference {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        let (name, index) = match lowered.split_once(':') {
            Some((name, index)) => {
                let index = index
                    .parse::<usize>()
                    .map_err(|_| format!("Invalid device index in '{}'", s))?;
                (name.to_string(), Some(index))
            }
            None => (lowered, None),
        };

        match (name.as_str(), index) {
            ("auto" | "automatic", None) => Ok(DevicePreference::Auto),
            ("cpu", None) => Ok(DevicePreference::Cpu),
            ("cuda" | "gpu" | "metal", index) => Ok(DevicePreference::Gpu(index)),
            _ => Err(format!("Unknown device preference: {}", s)),
        }
    }
}

impl DevicePreference {
    /// Resolve to a key-level device. Does not check the index is in range;
    /// key construction does that against the coordinator's device count.
    pub fn resolve(&self, gpu_count: usize) -> DeviceSpec {
        match self {
            DevicePreference::Auto if gpu_count > 0 => DeviceSpec::Gpu(0),
            DevicePreference::Auto | DevicePreference::Cpu => DeviceSpec::Cpu,
            DevicePreference::Gpu(index) => DeviceSpec::Gpu(index.unwrap_or(0)),
        }
    }
}

pub struct DeviceManager;

impl DeviceManager {
    /// Number of addressable GPUs. `configured` wins over detection.
    pub fn gpu_count(configured: Option<usize>) -> usize {
        match configured {
            Some(count) => count,
            None => *DETECTED_GPUS.get_or_init(Self::detect_gpu_count),
        }
    }

    fn detect_gpu_count() -> usize {
        if candle_core::utils::cuda_is_available() {
            let count = (0..MAX_PROBED_GPUS)
                .take_while(|index| match Device::new_cuda(*index) {
                    Ok(_) => true,
                    Err(e) => {
                        debug!("CUDA device {} not available: {}", index, e);
                        false
                    }
                })
                .count();
            info!("Detected {} CUDA device(s)", count);
            return count;
        }

        if candle_core::utils::metal_is_available() && Device::new_metal(0).is_ok() {
            info!("Detected Metal GPU");
            return 1;
        }

        info!("No GPU acceleration available, models will run on CPU");
        0
    }

    /// Open the candle device for a resolved spec.
    pub fn open(spec: DeviceSpec) -> Result<Device> {
        match spec {
            DeviceSpec::Cpu => Ok(Device::Cpu),
            DeviceSpec::Gpu(index) if candle_core::utils::cuda_is_available() => {
                Device::new_cuda(index).with_context(|| format!("failed to open CUDA device {}", index))
            }
            DeviceSpec::Gpu(index) => {
                Device::new_metal(index).with_context(|| format!("failed to open Metal device {}", index))
            }
        }
    }

    pub fn summary(configured: Option<usize>) -> DeviceSummary {
        let gpu_count = Self::gpu_count(configured);
        DeviceSummary {
            cuda_available: candle_core::utils::cuda_is_available(),
            metal_available: candle_core::utils::metal_is_available(),
            gpu_count,
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct DeviceSummary {
    pub cuda_available: bool,
    pub metal_available: bool,
    pub gpu_count: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_preference_parsing() {
        assert_eq!("auto".parse::<DevicePreference>().unwrap(), DevicePreference::Auto);
        assert_eq!("CPU".parse::<DevicePreference>().unwrap(), DevicePreference::Cpu);
        assert_eq!("cuda".parse::<DevicePreference>().unwrap(), DevicePreference::Gpu(None));
        assert_eq!("gpu:1".parse::<DevicePreference>().unwrap(), DevicePreference::Gpu(Some(1)));
        assert_eq!("metal:0".parse::<DevicePreference>().unwrap(), DevicePreference::Gpu(Some(0)));
        assert!("cpu:1".parse::<DevicePreference>().is_err());
        assert!("cuda:x".parse::<DevicePreference>().is_err());
        assert!("tpu".parse::<DevicePreference>().is_err());
    }

    #[test]
    fn test_resolve_against_gpu_count() {
        assert_eq!(DevicePreference::Auto.resolve(0), DeviceSpec::Cpu);
        assert_eq!(DevicePreference::Auto.resolve(2), DeviceSpec::Gpu(0));
        assert_eq!(DevicePreference::Cpu.resolve(2), DeviceSpec::Cpu);
        assert_eq!(DevicePreference::Gpu(None).resolve(0), DeviceSpec::Gpu(0));
        assert_eq!(DevicePreference::Gpu(Some(3)).resolve(1), DeviceSpec::Gpu(3));
    }

    #[test]
    fn test_configured_gpu_count_wins() {
        assert_eq!(DeviceManager::gpu_count(Some(4)), 4);
    }

    #[test]
    fn test_cpu_always_opens() {
        assert!(matches!(DeviceManager::open(DeviceSpec::Cpu).unwrap(), Device::Cpu));
    }
}
