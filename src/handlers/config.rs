//! # Configuration Handlers
//!
//! - `GET /api/v1/config` - current configuration
//! - `PUT /api/v1/config` - partial update, see [`AppConfig::update_from_json`]
//!
//! Updates apply to requests that start afterwards. Models that are already
//! resident stay loaded; a changed default only affects which key new
//! requests resolve to.

use crate::config::AppConfig;
use crate::{error::AppError, state::AppState};
use actix_web::{web, HttpResponse};
use serde_json::json;
use tracing::info;

fn config_json(config: &AppConfig) -> serde_json::Value {
    json!({
        "server": {
            "host": config.server.host,
            "port": config.server.port
        },
        "models": {
            "transcription_model": config.models.transcription_model,
            "alignment_model": config.models.alignment_model,
            "diarization_model": config.models.diarization_model,
            "device": config.models.device,
            "gpu_count": config.models.gpu_count,
            "compute_type": config.models.compute_type,
            "default_language": config.models.default_language,
            "preload": config.models.preload
        },
        "audio": {
            "sample_rate": config.audio.sample_rate,
            "max_upload_mb": config.audio.max_upload_mb
        },
        "performance": {
            "max_concurrent_transcriptions": config.performance.max_concurrent_transcriptions
        }
    })
}

pub async fn get_config(state: web::Data<AppState>) -> Result<HttpResponse, AppError> {
    let config = state.get_config();

    Ok(HttpResponse::Ok().json(json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "config": config_json(&config)
    })))
}

pub async fn update_config(
    state: web::Data<AppState>,
    body: web::Json<serde_json::Value>,
) -> Result<HttpResponse, AppError> {
    let json_str = serde_json::to_string(&body.into_inner())?;

    let mut current_config = state.get_config();
    current_config
        .update_from_json(&json_str)
        .map_err(|e| AppError::ValidationError(e.to_string()))?;

    state
        .update_config(current_config.clone())
        .map_err(|e| AppError::ValidationError(e.to_string()))?;
    info!("Configuration updated via API");

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "message": "Configuration updated successfully",
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "updated_config": config_json(&current_config)
    })))
}
