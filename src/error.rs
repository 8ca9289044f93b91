//! # Error Handling
//!
//! [`AppError`] is what handlers return. It converts the library-level errors
//! ([`CacheError`], [`AudioError`], anyhow and JSON errors) into one type, and
//! implements actix's `ResponseError` so every failure reaches the client in
//! the same JSON shape:
//!
//! ```json
//! {
//!   "error": {
//!     "type": "model_unavailable",
//!     "message": "failed to initialize model transcription:large-v3@gpu:0/float16: ...",
//!     "timestamp": "2025-01-01T12:00:00Z"
//!   }
//! }
//! ```
//!
//! ## HTTP Status Code Mapping:
//! - BadRequest / ValidationError → 400
//! - PayloadTooLarge → 413
//! - ModelUnavailable → 503 (the backend could not load the model; retrying
//!   may succeed)
//! - Internal → 500

use crate::audio::AudioError;
use crate::cache::CacheError;
use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("Model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

impl AppError {
    fn kind(&self) -> (StatusCode, &'static str, &str) {
        match self {
            AppError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg.as_str()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg.as_str()),
            AppError::PayloadTooLarge(msg) => {
                (StatusCode::PAYLOAD_TOO_LARGE, "payload_too_large", msg.as_str())
            }
            AppError::ModelUnavailable(msg) => {
                (StatusCode::SERVICE_UNAVAILABLE, "model_unavailable", msg.as_str())
            }
            AppError::ValidationError(msg) => (StatusCode::BAD_REQUEST, "validation_error", msg.as_str()),
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> StatusCode {
        self.kind().0
    }

    fn error_response(&self) -> HttpResponse {
        let (status, error_type, message) = self.kind();
        HttpResponse::build(status).json(json!({
            "error": {
                "type": error_type,
                "message": message,
                "timestamp": chrono::Utc::now().to_rfc3339()
            }
        }))
    }
}

impl From<CacheError> for AppError {
    fn from(err: CacheError) -> Self {
        match err {
            CacheError::InvalidKey(_) => AppError::ValidationError(err.to_string()),
            CacheError::ModelInitialization { .. } => AppError::ModelUnavailable(err.to_string()),
        }
    }
}

impl From<AudioError> for AppError {
    fn from(err: AudioError) -> Self {
        match err {
            AudioError::TooLarge { .. } => AppError::PayloadTooLarge(err.to_string()),
            _ => AppError::BadRequest(err.to_string()),
        }
    }
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Internal(format!("{:#}", err))
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::BadRequest(format!("JSON parsing error: {}", err))
    }
}

pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use actix_web::body::to_bytes;

    #[test]
    fn test_cache_errors_map_to_status() {
        let invalid: AppError = CacheError::InvalidKey("device gpu:3 does not exist".into()).into();
        assert_eq!(invalid.status_code(), StatusCode::BAD_REQUEST);

        let failed: AppError = CacheError::ModelInitialization {
            key: "transcription:base@cpu/float32".into(),
            reason: "out of memory".into(),
        }
        .into();
        assert_eq!(failed.status_code(), StatusCode::SERVICE_UNAVAILABLE);
    }

    #[test]
    fn test_audio_errors_map_to_status() {
        let too_large: AppError = AudioError::TooLarge { size: 10, limit: 5 }.into();
        assert_eq!(too_large.status_code(), StatusCode::PAYLOAD_TOO_LARGE);

        let empty: AppError = AudioError::Empty.into();
        assert_eq!(empty.status_code(), StatusCode::BAD_REQUEST);
    }

    #[actix_web::test]
    async fn test_error_body_shape() {
        let response = AppError::BadRequest("model".into()).error_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let body = to_bytes(response.into_body()).await.unwrap();
        let value: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(value["error"]["type"], "bad_request");
        assert_eq!(value["error"]["message"], "model");
        assert!(value["error"]["timestamp"].is_string());
    }
}
