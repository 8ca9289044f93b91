//! # Audio Intake
//!
//! Decodes uploaded audio into the mono `f32` samples Whisper consumes.
//!
//! ## Accepted input:
//! - **WAV**: 8/16/24-bit integer or 32-bit float PCM, any channel count
//!   (channels are averaged down to mono)
//! - **Raw PCM**: headerless 16-bit little-endian mono, recognized by a
//!   `.pcm` / `.raw` file name
//!
//! No resampling is done: audio must already be at the configured rate.

pub mod decoder;

pub use decoder::{AudioDecoder, AudioError, DecodedAudio};
