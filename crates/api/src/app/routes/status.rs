use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path},
    http::StatusCode,
    response::IntoResponse,
};

use bloodwork_core::JobId;

use crate::app::dto::StatusResponse;
use crate::app::errors::{api_error_to_response, json_error};
use crate::app::services::AppServices;

/// `GET /status/:id`: resolve a job to its normalized state plus result or
/// failure reason.
pub async fn status(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id: JobId = match id.parse() {
        Ok(id) => id,
        Err(_) => return json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid job id"),
    };

    match services.status.report(job_id).await {
        Ok(view) => (StatusCode::OK, Json(StatusResponse::from(view))).into_response(),
        Err(e) => api_error_to_response(e),
    }
}
