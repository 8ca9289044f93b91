//! # Upload Decoding
//!
//! Turns an uploaded file into mono `f32` samples for Whisper.
//!
//! ## Accepted input:
//! - **WAV**: detected by its `RIFF`/`WAVE` header. 8, 16 and 24-bit integer or
//!   32-bit float PCM, any channel count (averaged down to mono)
//! - **Raw PCM**: 16-bit little-endian mono, recognized by a `.pcm` or `.raw`
//!   file extension
//!
//! The sample rate must already match the configured rate; nothing is
//! resampled here.

use byteorder::{LittleEndian, ReadBytesExt};
use std::io::Cursor;
use thiserror::Error;
use wav::BitDepth;

#[derive(Debug, Error)]
pub enum AudioError {
    #[error("audio file is empty")]
    Empty,

    #[error("audio file is {size} bytes, limit is {limit} bytes")]
    TooLarge { size: usize, limit: usize },

    #[error("audio is sampled at {actual} Hz, expected {expected} Hz")]
    SampleRate { expected: u32, actual: u32 },

    #[error("unsupported audio format: {0}")]
    Unsupported(String),

    #[error("malformed audio: {0}")]
    Malformed(String),
}

/// Mono samples in `[-1.0, 1.0]` at `sample_rate`.
#[derive(Debug, Clone)]
pub struct DecodedAudio {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl DecodedAudio {
    pub fn duration_secs(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Validates and decodes uploads against the configured format.
#[derive(Debug, Clone)]
pub struct AudioDecoder {
    sample_rate: u32,
    max_bytes: usize,
}

impl AudioDecoder {
    pub fn new(sample_rate: u32, max_upload_mb: usize) -> Self {
        Self {
            sample_rate,
            max_bytes: max_upload_mb * 1024 * 1024,
        }
    }

    pub fn max_bytes(&self) -> usize {
        self.max_bytes
    }

    /// Decode `data`. `filename` is only used to recognize raw PCM.
    pub fn decode(&self, data: &[u8], filename: Option<&str>) -> Result<DecodedAudio, AudioError> {
        if data.is_empty() {
            return Err(AudioError::Empty);
        }
        if data.len() > self.max_bytes {
            return Err(AudioError::TooLarge {
                size: data.len(),
                limit: self.max_bytes,
            });
        }

        let samples = if is_wav(data) {
            self.decode_wav(data)?
        } else if is_raw_pcm_name(filename) {
            decode_raw_pcm(data)?
        } else {
            return Err(AudioError::Unsupported(format!(
                "{} (expected WAV or raw 16-bit PCM)",
                filename.unwrap_or("upload")
            )));
        };

        if samples.is_empty() {
            return Err(AudioError::Empty);
        }

        Ok(DecodedAudio {
            samples,
            sample_rate: self.sample_rate,
        })
    }

    fn decode_wav(&self, data: &[u8]) -> Result<Vec<f32>, AudioError> {
        let (header, track) = wav::read(&mut Cursor::new(data))
            .map_err(|e| AudioError::Malformed(e.to_string()))?;

        if header.sampling_rate != self.sample_rate {
            return Err(AudioError::SampleRate {
                expected: self.sample_rate,
                actual: header.sampling_rate,
            });
        }

        let interleaved: Vec<f32> = match track {
            BitDepth::Eight(samples) => samples
                .iter()
                .map(|&s| (s as f32 - 128.0) / 128.0)
                .collect(),
            BitDepth::Sixteen(samples) => samples.iter().map(|&s| s as f32 / 32768.0).collect(),
            BitDepth::TwentyFour(samples) => {
                samples.iter().map(|&s| s as f32 / 8_388_608.0).collect()
            }
            BitDepth::ThirtyTwoFloat(samples) => samples,
            BitDepth::Empty => Vec::new(),
        };

        Ok(downmix(&interleaved, header.channel_count.max(1) as usize))
    }
}

fn is_wav(data: &[u8]) -> bool {
    data.len() >= 12 && &data[0..4] == b"RIFF" && &data[8..12] == b"WAVE"
}

fn is_raw_pcm_name(filename: Option<&str>) -> bool {
    filename
        .map(|name| {
            let name = name.to_lowercase();
            name.ends_with(".pcm") || name.ends_with(".raw")
        })
        .unwrap_or(false)
}

fn decode_raw_pcm(data: &[u8]) -> Result<Vec<f32>, AudioError> {
    if data.len() % 2 != 0 {
        return Err(AudioError::Malformed(
            "raw PCM length must be even for 16-bit samples".to_string(),
        ));
    }

    let mut cursor = Cursor::new(data);
    let mut samples = Vec::with_capacity(data.len() / 2);
    while let Ok(sample) = cursor.read_i16::<LittleEndian>() {
        samples.push(sample as f32 / 32768.0);
    }
    Ok(samples)
}

/// Average interleaved frames down to one channel.
fn downmix(interleaved: &[f32], channels: usize) -> Vec<f32> {
    if channels == 1 {
        return interleaved.to_vec();
    }
    interleaved
        .chunks_exact(channels)
        .map(|frame| frame.iter().sum::<f32>() / channels as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use wav::Header;

    fn wav_bytes(channels: u16, rate: u32, track: BitDepth) -> Vec<u8> {
        let bits = match &track {
            BitDepth::Eight(_) => 8,
            BitDepth::Sixteen(_) => 16,
            BitDepth::TwentyFour(_) => 24,
            BitDepth::ThirtyTwoFloat(_) => 32,
            BitDepth::Empty => 0,
        };
        let format = if matches!(track, BitDepth::ThirtyTwoFloat(_)) {
            wav::WAV_FORMAT_IEEE_FLOAT
        } else {
            wav::WAV_FORMAT_PCM
        };
        let mut out = Cursor::new(Vec::new());
        wav::write(Header::new(format, channels, rate, bits), &track, &mut out).unwrap();
        out.into_inner()
    }

    #[test]
    fn test_decode_mono_16_bit_wav() {
        let decoder = AudioDecoder::new(16_000, 1);
        let data = wav_bytes(1, 16_000, BitDepth::Sixteen(vec![0, 16384, -32768]));
        let audio = decoder.decode(&data, Some("clip.wav")).unwrap();
        assert_eq!(audio.samples, vec![0.0, 0.5, -1.0]);
    }

    #[test]
    fn test_stereo_is_downmixed() {
        let decoder = AudioDecoder::new(16_000, 1);
        let data = wav_bytes(2, 16_000, BitDepth::Sixteen(vec![16384, 0, -16384, -16384]));
        let audio = decoder.decode(&data, None).unwrap();
        assert_eq!(audio.samples, vec![0.25, -0.5]);
    }

    #[test]
    fn test_wrong_sample_rate_is_rejected() {
        let decoder = AudioDecoder::new(16_000, 1);
        let data = wav_bytes(1, 44_100, BitDepth::Sixteen(vec![0; 32]));
        assert!(matches!(
            decoder.decode(&data, None),
            Err(AudioError::SampleRate { expected: 16_000, actual: 44_100 })
        ));
    }

    #[test]
    fn test_raw_pcm_by_extension() {
        let decoder = AudioDecoder::new(16_000, 1);
        let data = [0x00, 0x40, 0x00, 0xC0];
        let audio = decoder.decode(&data, Some("Recording.PCM")).unwrap();
        assert_eq!(audio.samples, vec![0.5, -0.5]);
        assert!(matches!(
            decoder.decode(&data[..3], Some("x.raw")),
            Err(AudioError::Malformed(_))
        ));
    }

    #[test]
    fn test_unknown_and_oversized_uploads() {
        let decoder = AudioDecoder::new(16_000, 1);
        assert!(matches!(
            decoder.decode(b"ID3\x04 not a wav", Some("song.mp3")),
            Err(AudioError::Unsupported(_))
        ));
        assert!(matches!(decoder.decode(&[], None), Err(AudioError::Empty)));

        let big = vec![0u8; decoder.max_bytes() + 2];
        assert!(matches!(
            decoder.decode(&big, Some("big.pcm")),
            Err(AudioError::TooLarge { .. })
        ));
    }

    #[test]
    fn test_duration() {
        let audio = DecodedAudio {
            samples: vec![0.0; 8000],
            sample_rate: 16_000,
        };
        assert_eq!(audio.duration_secs(), 0.5);
    }
}
