//! # Transcription
//!
//! Speech-to-text on candle: the Whisper model itself, the [`CandleBackend`]
//! that plugs model loading into the cache, and the transcript types with
//! their response renderers.

pub mod backend;
pub mod format;
pub mod transcript;
pub mod whisper;

pub use backend::{CandleBackend, HubSettings, LoadedModel};
pub use format::{Rendered, ResponseFormat};
pub use transcript::{Segment, Transcript};
