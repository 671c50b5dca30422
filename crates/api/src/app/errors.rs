use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde_json::json;
use thiserror::Error;

use bloodwork_core::PipelineError;

/// Failures surfaced at the HTTP boundary.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Ingress validation failed; the job was never created.
    #[error("{0}")]
    Validation(PipelineError),

    #[error("invalid job id: {0}")]
    InvalidId(String),

    #[error("job not found")]
    NotFound,

    #[error("broker unavailable: {0}")]
    Broker(String),

    #[error("storage error: {0}")]
    Storage(String),

    #[error("crypto error: {0}")]
    Crypto(String),
}

pub fn api_error_to_response(err: ApiError) -> axum::response::Response {
    match err {
        ApiError::Validation(e) => {
            let code = match e {
                PipelineError::UnsupportedFormat(_) => "unsupported_format",
                PipelineError::EmptyDocument(_) => "empty_document",
                _ => "validation_error",
            };
            json_error(StatusCode::BAD_REQUEST, code, e.to_string())
        }
        ApiError::InvalidId(msg) => json_error(StatusCode::BAD_REQUEST, "invalid_id", msg),
        ApiError::NotFound => json_error(StatusCode::NOT_FOUND, "not_found", "job not found"),
        ApiError::Broker(msg) => json_error(StatusCode::BAD_GATEWAY, "broker_error", msg),
        ApiError::Storage(msg) => {
            json_error(StatusCode::INTERNAL_SERVER_ERROR, "storage_error", msg)
        }
        ApiError::Crypto(msg) => json_error(StatusCode::INTERNAL_SERVER_ERROR, "crypto_error", msg),
    }
}

pub fn json_error(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> axum::response::Response {
    (
        status,
        axum::Json(json!({
            "error": code,
            "message": message.into(),
        })),
    )
        .into_response()
}
