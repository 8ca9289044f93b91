//! # Transcription Endpoint
//!
//! `POST /v1/audio/transcriptions`, compatible with the OpenAI audio API.
//!
//! ## Multipart fields:
//! - `file` (required): WAV or raw 16-bit PCM audio
//! - `model`, `device`, `compute_type`: model selection, config defaults apply
//! - `language`: ISO 639-1 code, defaults to `models.default_language`
//! - `response_format`: see [`ResponseFormat`], defaults to `json`
//! - `include_timestamps`: `true` / `false`, markdown formats only
//!
//! ## Request flow:
//! 1. Parse the form and resolve the cache key (400 on bad parameters)
//! 2. Decode the audio (400 / 413)
//! 3. Wait for a transcription permit
//! 4. Check out the model, loading it if cold (503 if loading fails)
//! 5. Run inference on a blocking thread and render the response

use crate::audio::AudioDecoder;
use crate::cache::ModelKind;
use crate::error::{AppError, AppResult};
use crate::handlers::models::resolve_key;
use crate::state::AppState;
use crate::transcription::ResponseFormat;
use actix_multipart::{Field, Multipart};
use actix_web::{web, HttpResponse};
use futures_util::StreamExt;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info};

/// Parsed multipart form.
#[derive(Debug, Default)]
struct TranscriptionForm {
    audio: Option<Vec<u8>>,
    filename: Option<String>,
    fields: HashMap<String, String>,
}

impl TranscriptionForm {
    fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .get(name)
            .map(|value| value.trim())
            .filter(|value| !value.is_empty())
    }
}

/// Read one field fully, failing once it grows past `limit` bytes.
async fn read_field(field: &mut Field, limit: usize) -> AppResult<Vec<u8>> {
    let mut bytes = Vec::new();
    while let Some(chunk) = field.next().await {
        let chunk = chunk.map_err(|e| AppError::BadRequest(format!("Chunk error: {}", e)))?;
        if bytes.len() + chunk.len() > limit {
            return Err(AppError::PayloadTooLarge(format!(
                "Upload exceeds {} bytes",
                limit
            )));
        }
        bytes.extend_from_slice(&chunk);
    }
    Ok(bytes)
}

async fn read_form(mut payload: Multipart, max_bytes: usize) -> AppResult<TranscriptionForm> {
    let mut form = TranscriptionForm::default();

    while let Some(item) = payload.next().await {
        let mut field =
            item.map_err(|e| AppError::BadRequest(format!("Multipart error: {}", e)))?;

        let (name, filename) = {
            let disposition = field
                .content_disposition()
                .ok_or_else(|| AppError::BadRequest("Missing content disposition".to_string()))?;
            let name = disposition
                .get_name()
                .ok_or_else(|| AppError::BadRequest("Missing field name".to_string()))?
                .to_string();
            (name, disposition.get_filename().map(str::to_string))
        };

        if name == "file" {
            form.filename = filename;
            form.audio = Some(read_field(&mut field, max_bytes).await?);
        } else {
            let value = read_field(&mut field, 64 * 1024).await?;
            let value = String::from_utf8(value)
                .map_err(|_| AppError::BadRequest(format!("Field {} is not valid UTF-8", name)))?;
            form.fields.insert(name, value);
        }
    }

    Ok(form)
}

fn parse_bool(name: &str, value: Option<&str>) -> AppResult<bool> {
    match value.map(str::to_lowercase).as_deref() {
        None | Some("false") | Some("0") => Ok(false),
        Some("true") | Some("1") => Ok(true),
        Some(other) => Err(AppError::BadRequest(format!(
            "Field {} must be true or false, got {}",
            name, other
        ))),
    }
}

/// Transcribe an uploaded audio file.
///
/// ## Endpoint: `POST /v1/audio/transcriptions`
pub async fn create_transcription(
    state: web::Data<AppState>,
    payload: Multipart,
) -> AppResult<HttpResponse> {
    let started = Instant::now();
    let config = state.get_config();
    let decoder = AudioDecoder::new(config.audio.sample_rate, config.audio.max_upload_mb);

    let form = read_form(payload, decoder.max_bytes()).await?;

    let format = match form.field("response_format") {
        Some(format) => format.parse::<ResponseFormat>().map_err(AppError::BadRequest)?,
        None => ResponseFormat::default(),
    };
    let include_timestamps = parse_bool("include_timestamps", form.field("include_timestamps"))?;
    let language = form
        .field("language")
        .map(str::to_string)
        .or(config.models.default_language.clone());

    let key = resolve_key(
        &state,
        ModelKind::Transcription,
        form.field("model"),
        form.field("device"),
        form.field("compute_type"),
        &serde_json::Map::new(),
    )?;

    let audio_bytes = form
        .audio
        .as_deref()
        .ok_or_else(|| AppError::BadRequest("No audio file provided (field 'file')".to_string()))?;
    let audio = decoder.decode(audio_bytes, form.filename.as_deref())?;
    debug!(
        "Decoded {:.2}s of audio from {}",
        audio.duration_secs(),
        form.filename.as_deref().unwrap_or("upload")
    );

    let _permit = state
        .transcriptions
        .acquire()
        .await
        .map_err(|e| AppError::Internal(format!("Transcription limiter closed: {}", e)))?;

    let model = state.models.acquire(&key).await?;

    if let Some(language) = &language {
        if !model.supports_language(language) {
            return Err(AppError::BadRequest(format!("Unsupported language: {}", language)));
        }
    }

    let active = state.track_transcription();
    let result = web::block(move || {
        let transcript = model.transcribe(&audio.samples, language.as_deref());
        drop(model);
        transcript
    })
    .await;
    drop(active);

    let transcript = result
        .map_err(|e| AppError::Internal(format!("Transcription task failed: {}", e)))??;

    info!(
        key = %key,
        audio_seconds = transcript.duration,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "transcription finished"
    );

    let rendered = format.render(&transcript, include_timestamps);
    Ok(HttpResponse::Ok()
        .content_type(rendered.content_type)
        .body(rendered.body))
}
