//! # Whisper Model
//!
//! Loads a Whisper checkpoint from the Hugging Face hub with candle and turns
//! 16 kHz mono PCM into timed segments.
//!
//! ## Loading Process:
//! 1. Download `config.json`, `tokenizer.json` and `model.safetensors`
//!    (cached locally by hf-hub)
//! 2. Build the mel filter bank for the checkpoint's number of mel bins
//! 3. Memory-map the weights onto the target device in the requested dtype
//!
//! ## Decoding:
//! The log-mel spectrogram is cut into 30 second windows. Each window is
//! encoded once and decoded greedily without timestamp tokens, so every
//! window becomes one segment.

use anyhow::{anyhow, Context, Result};
use candle_core::{DType, Device, IndexOp, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::whisper::{self as m, Config};
use hf_hub::api::sync::Api;
use std::time::Instant;
use tokenizers::Tokenizer;
use tracing::{debug, info};

use crate::transcription::transcript::{Segment, Transcript};

/// Which special task token to prime the decoder with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    Transcribe,
    Translate,
}

impl std::str::FromStr for Task {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "transcribe" => Ok(Task::Transcribe),
            "translate" => Ok(Task::Translate),
            other => Err(anyhow!("Unknown whisper task: {}", other)),
        }
    }
}

/// Special token ids resolved from the tokenizer at load time.
#[derive(Debug, Clone, Copy)]
struct SpecialTokens {
    sot: u32,
    eot: u32,
    task: u32,
    no_timestamps: u32,
}

pub struct WhisperModel {
    model: m::model::Whisper,
    config: Config,
    tokenizer: Tokenizer,
    mel_filters: Vec<f32>,
    tokens: SpecialTokens,
    /// Added to the logits before argmax; `-inf` at suppressed tokens.
    suppress_mask: Tensor,
    device: Device,
    dtype: DType,
}

fn token_id(tokenizer: &Tokenizer, token: &str) -> Result<u32> {
    tokenizer
        .token_to_id(token)
        .ok_or_else(|| anyhow!("Tokenizer has no id for {}", token))
}

impl WhisperModel {
    /// Download (if needed) and load `repo` onto `device`.
    pub fn load(api: &Api, repo: &str, device: &Device, dtype: DType, task: Task) -> Result<Self> {
        let started = Instant::now();
        info!("Loading Whisper model {} ({:?} on {:?})", repo, dtype, device);

        let hub = api.model(repo.to_string());
        let config_file = hub
            .get("config.json")
            .with_context(|| format!("Failed to download config.json from {}", repo))?;
        let tokenizer_file = hub
            .get("tokenizer.json")
            .with_context(|| format!("Failed to download tokenizer.json from {}", repo))?;
        let weights_file = hub
            .get("model.safetensors")
            .with_context(|| format!("Failed to download model.safetensors from {}", repo))?;

        let config: Config = serde_json::from_reader(std::fs::File::open(config_file)?)?;
        debug!("Model config: {:?}", config);

        let tokenizer = Tokenizer::from_file(tokenizer_file)
            .map_err(|e| anyhow!("Failed to load tokenizer: {}", e))?;

        let tokens = SpecialTokens {
            sot: token_id(&tokenizer, m::SOT_TOKEN)?,
            eot: token_id(&tokenizer, m::EOT_TOKEN)?,
            task: match task {
                Task::Transcribe => token_id(&tokenizer, m::TRANSCRIBE_TOKEN)?,
                Task::Translate => token_id(&tokenizer, m::TRANSLATE_TOKEN)?,
            },
            no_timestamps: token_id(&tokenizer, m::NO_TIMESTAMPS_TOKEN)?,
        };

        let suppress: Vec<f32> = (0..config.vocab_size as u32)
            .map(|id| {
                if config.suppress_tokens.contains(&id) || id == tokens.no_timestamps {
                    f32::NEG_INFINITY
                } else {
                    0.0
                }
            })
            .collect();
        let suppress_mask = Tensor::new(suppress.as_slice(), device)?;

        let mel_filters = mel_filter_bank(config.num_mel_bins, m::N_FFT, m::SAMPLE_RATE);

        // SAFETY: the file is owned by the hub cache and not modified while mapped.
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights_file], dtype, device)? };
        let model = m::model::Whisper::load(&vb, config.clone())?;

        info!(
            "Whisper model {} loaded in {:.2}s",
            repo,
            started.elapsed().as_secs_f64()
        );

        Ok(Self {
            model,
            config,
            tokenizer,
            mel_filters,
            tokens,
            suppress_mask,
            device: device.clone(),
            dtype,
        })
    }

    /// Token id for a language code such as `en`, if the checkpoint knows it.
    pub fn language_token(&self, language: &str) -> Option<u32> {
        self.tokenizer
            .token_to_id(&format!("<|{}|>", language.trim().to_lowercase()))
    }

    /// Transcribe mono `pcm` sampled at 16 kHz.
    pub fn transcribe(&mut self, pcm: &[f32], language: Option<&str>) -> Result<Transcript> {
        if pcm.is_empty() {
            return Err(anyhow!("Audio data is empty"));
        }

        let language_token = match language {
            Some(code) => Some(
                self.language_token(code)
                    .ok_or_else(|| anyhow!("Unsupported language: {}", code))?,
            ),
            None => None,
        };

        let started = Instant::now();
        let n_mels = self.config.num_mel_bins;
        let mel = m::audio::pcm_to_mel(&self.config, pcm, &self.mel_filters);
        let mel_len = mel.len();
        let mel = Tensor::from_vec(mel, (1, n_mels, mel_len / n_mels), &self.device)?
            .to_dtype(self.dtype)?;

        let duration = pcm.len() as f64 / m::SAMPLE_RATE as f64;
        let content_frames = pcm.len().div_ceil(m::HOP_LENGTH);
        let frame_seconds = m::HOP_LENGTH as f64 / m::SAMPLE_RATE as f64;

        let mut segments = Vec::new();
        let mut seek = 0;
        while seek < content_frames {
            let segment_size = usize::min(content_frames - seek, m::N_FRAMES);
            let window = mel.narrow(2, seek, segment_size)?;
            let text = self.decode_window(&window, language_token)?;

            let start = seek as f64 * frame_seconds;
            let end = ((seek + segment_size) as f64 * frame_seconds).min(duration);
            debug!("Decoded window {:.1}s-{:.1}s: {:?}", start, end, text);

            segments.push(Segment {
                id: segments.len(),
                start,
                end,
                text,
                speaker: None,
            });
            seek += segment_size;
        }

        debug!(
            "Transcribed {:.2}s of audio in {:.2}s",
            duration,
            started.elapsed().as_secs_f64()
        );

        Ok(Transcript::from_segments(
            language.map(str::to_lowercase).unwrap_or_else(|| "en".to_string()),
            duration,
            segments,
        ))
    }

    fn decode_window(&mut self, mel: &Tensor, language_token: Option<u32>) -> Result<String> {
        let audio_features = self.model.encoder.forward(mel, true)?;

        let mut tokens = vec![self.tokens.sot];
        tokens.extend(language_token);
        tokens.push(self.tokens.task);
        tokens.push(self.tokens.no_timestamps);
        let prompt_len = tokens.len();

        let sample_len = self.config.max_target_positions / 2;
        for i in 0..sample_len {
            let tokens_t = Tensor::new(tokens.as_slice(), &self.device)?.unsqueeze(0)?;
            let ys = self.model.decoder.forward(&tokens_t, &audio_features, i == 0)?;

            let (_, seq_len, _) = ys.dims3()?;
            let logits = self
                .model
                .decoder
                .final_linear(&ys.i((..1, seq_len - 1..))?)?
                .i(0)?
                .i(0)?
                .to_dtype(DType::F32)?;
            let logits = logits.broadcast_add(&self.suppress_mask)?;
            let next = logits.argmax(0)?.to_scalar::<u32>()?;

            if next == self.tokens.eot || tokens.len() >= self.config.max_target_positions {
                break;
            }
            tokens.push(next);
        }

        let text = self
            .tokenizer
            .decode(&tokens[prompt_len..], true)
            .map_err(|e| anyhow!("Tokenizer decode error: {}", e))?;
        Ok(text.trim().to_string())
    }
}

fn hz_to_mel(hz: f64) -> f64 {
    const F_SP: f64 = 200.0 / 3.0;
    const MIN_LOG_HZ: f64 = 1000.0;
    let min_log_mel = MIN_LOG_HZ / F_SP;
    let log_step = 6.4f64.ln() / 27.0;
    if hz >= MIN_LOG_HZ {
        min_log_mel + (hz / MIN_LOG_HZ).ln() / log_step
    } else {
        hz / F_SP
    }
}

fn mel_to_hz(mel: f64) -> f64 {
    const F_SP: f64 = 200.0 / 3.0;
    const MIN_LOG_HZ: f64 = 1000.0;
    let min_log_mel = MIN_LOG_HZ / F_SP;
    let log_step = 6.4f64.ln() / 27.0;
    if mel >= min_log_mel {
        MIN_LOG_HZ * (log_step * (mel - min_log_mel)).exp()
    } else {
        mel * F_SP
    }
}

/// Slaney-normalized triangular mel filters, laid out `n_mels x (n_fft / 2 + 1)`.
fn mel_filter_bank(n_mels: usize, n_fft: usize, sample_rate: usize) -> Vec<f32> {
    let n_freqs = n_fft / 2 + 1;
    let fft_freqs: Vec<f64> = (0..n_freqs)
        .map(|i| i as f64 * sample_rate as f64 / n_fft as f64)
        .collect();

    let min_mel = hz_to_mel(0.0);
    let max_mel = hz_to_mel(sample_rate as f64 / 2.0);
    let points: Vec<f64> = (0..n_mels + 2)
        .map(|i| mel_to_hz(min_mel + (max_mel - min_mel) * i as f64 / (n_mels + 1) as f64))
        .collect();

    let mut filters = vec![0.0f32; n_mels * n_freqs];
    for mel in 0..n_mels {
        let (lower, center, upper) = (points[mel], points[mel + 1], points[mel + 2]);
        let norm = 2.0 / (upper - lower);
        for (k, freq) in fft_freqs.iter().enumerate() {
            let rising = (freq - lower) / (center - lower);
            let falling = (upper - freq) / (upper - center);
            let weight = rising.min(falling).max(0.0);
            filters[mel * n_freqs + k] = (weight * norm) as f32;
        }
    }
    filters
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mel_scale_round_trips() {
        for hz in [0.0, 440.0, 1000.0, 4000.0, 8000.0] {
            assert!((mel_to_hz(hz_to_mel(hz)) - hz).abs() < 1e-6);
        }
    }

    #[test]
    fn test_mel_filter_bank_shape() {
        let filters = mel_filter_bank(80, 400, 16_000);
        assert_eq!(filters.len(), 80 * 201);
        assert!(filters.iter().all(|w| *w >= 0.0 && w.is_finite()));
        for mel in 0..80 {
            let row = &filters[mel * 201..(mel + 1) * 201];
            assert!(row.iter().any(|w| *w > 0.0), "mel bin {} has no support", mel);
        }
    }

    #[test]
    fn test_task_parsing() {
        assert_eq!("translate".parse::<Task>().unwrap(), Task::Translate);
        assert!("summarize".parse::<Task>().is_err());
    }
}
