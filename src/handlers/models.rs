//! # Model Management Handlers
//!
//! ## Available Endpoints:
//! - `GET /v1/models` - resident model instances
//! - `POST /v1/models/load` - warm a model of any kind
//! - `POST /v1/models/unload` - release one model, a whole kind, or everything
//!
//! Parameters a request leaves out are filled from the `models` config
//! section before the cache key is built.

use crate::cache::{options_from_json, CacheKey, ModelKind, UnloadTarget};
use crate::device::DevicePreference;
use crate::error::{AppError, AppResult};
use crate::state::AppState;
use crate::transcription::backend::parse_dtype;
use actix_web::{web, HttpResponse};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::time::Instant;
use tracing::info;

/// Optional model parameters as they arrive from a client.
#[derive(Debug, Default, Deserialize)]
pub struct ModelParams {
    pub kind: Option<String>,
    pub model: Option<String>,
    pub device: Option<String>,
    pub compute_type: Option<String>,
    #[serde(default)]
    pub options: serde_json::Map<String, serde_json::Value>,
}

#[derive(Debug, Serialize)]
pub struct ResidentModelResponse {
    pub id: String,
    #[serde(flatten)]
    pub key: serde_json::Value,
    pub loaded_at: String,
    pub in_flight: usize,
}

/// Build the cache key for `kind` from request parameters and config defaults.
pub fn resolve_key(
    state: &AppState,
    kind: ModelKind,
    model: Option<&str>,
    device: Option<&str>,
    compute_type: Option<&str>,
    options: &serde_json::Map<String, serde_json::Value>,
) -> AppResult<CacheKey> {
    let config = state.get_config();

    let model = model.unwrap_or_else(|| config.models.default_model(kind));

    let preference = match device {
        Some(device) => device
            .parse::<DevicePreference>()
            .map_err(AppError::BadRequest)?,
        None => config.models.device_preference()?,
    };
    let device = preference.resolve(state.models.device_count());

    let compute_type = compute_type
        .unwrap_or(config.models.compute_type.as_str())
        .trim()
        .to_lowercase();
    parse_dtype(&compute_type).map_err(|e| AppError::BadRequest(e.to_string()))?;

    let options = options_from_json(options)?;
    Ok(state
        .models
        .make_key(kind, model, device, &compute_type, options)?)
}

fn parse_kind(kind: Option<&str>) -> AppResult<ModelKind> {
    match kind {
        Some(kind) => kind.parse().map_err(AppError::from),
        None => Ok(ModelKind::Transcription),
    }
}

/// List resident models.
///
/// ## Endpoint: `GET /v1/models`
pub async fn list_models(state: web::Data<AppState>) -> HttpResponse {
    let config = state.get_config();
    let models: Vec<ResidentModelResponse> = state
        .models
        .resident()
        .into_iter()
        .map(|model| ResidentModelResponse {
            id: model.key.to_string(),
            key: model.key.to_json(),
            loaded_at: model.loaded_at.to_rfc3339(),
            in_flight: model.in_flight,
        })
        .collect();

    let defaults: serde_json::Map<String, serde_json::Value> = ModelKind::ALL
        .iter()
        .map(|kind| (kind.to_string(), json!(config.models.default_model(*kind))))
        .collect();

    HttpResponse::Ok().json(json!({
        "object": "list",
        "data": models,
        "defaults": defaults,
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

/// Load a model (no-op if it is already resident).
///
/// ## Endpoint: `POST /v1/models/load`
///
/// ## Request Body:
/// ```json
/// {
///   "kind": "transcription",
///   "model": "large-v3",
///   "device": "cuda:0",
///   "compute_type": "float16",
///   "options": {"task": "translate"}
/// }
/// ```
/// Every field is optional.
pub async fn load_model(
    state: web::Data<AppState>,
    request: web::Json<ModelParams>,
) -> AppResult<HttpResponse> {
    let params = request.into_inner();
    let kind = parse_kind(params.kind.as_deref())?;
    let key = resolve_key(
        &state,
        kind,
        params.model.as_deref(),
        params.device.as_deref(),
        params.compute_type.as_deref(),
        &params.options,
    )?;

    let was_resident = state.models.is_resident(&key);
    let started = Instant::now();
    let lease = state.models.acquire(&key).await?;
    let elapsed = started.elapsed().as_secs_f64();

    info!(key = %key, was_resident, "load requested via API");

    Ok(HttpResponse::Ok().json(json!({
        "status": if was_resident { "already_loaded" } else { "loaded" },
        "id": key.to_string(),
        "model": key.to_json(),
        "repository": lease.repo(),
        "loaded_at": lease.loaded_at().to_rfc3339(),
        "load_time_seconds": elapsed,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}

/// Release models.
///
/// ## Endpoint: `POST /v1/models/unload`
///
/// ## Request Body (one of):
/// - `{"kind": "all"}`: everything
/// - `{"kind": "diarization"}`: every resident model of a kind
/// - `{"model": "large-v3", "device": "cuda:0", ...}`: one exact model,
///   resolved like a load request
pub async fn unload_model(
    state: web::Data<AppState>,
    request: web::Json<ModelParams>,
) -> AppResult<HttpResponse> {
    let params = request.into_inner();

    let released = match (params.model.as_deref(), params.kind.as_deref()) {
        (Some(model), kind) => {
            let kind = parse_kind(kind)?;
            let key = resolve_key(
                &state,
                kind,
                Some(model),
                params.device.as_deref(),
                params.compute_type.as_deref(),
                &params.options,
            )?;
            usize::from(state.models.release(&key).await)
        }
        (None, Some(kind)) if kind.eq_ignore_ascii_case("all") => {
            state.models.release_target(UnloadTarget::All).await
        }
        (None, Some(kind)) => {
            let kind = parse_kind(Some(kind))?;
            state.models.release_target(UnloadTarget::Kind(kind)).await
        }
        (None, None) => {
            return Err(AppError::BadRequest(
                "Specify a model, a kind, or kind \"all\"".to_string(),
            ))
        }
    };

    Ok(HttpResponse::Ok().json(json!({
        "status": "success",
        "released": released,
        "timestamp": chrono::Utc::now().to_rfc3339()
    })))
}
