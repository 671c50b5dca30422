use std::sync::Arc;

use axum::{
    extract::{Extension, Path},
    http::{StatusCode, header},
    response::IntoResponse,
};

use bloodwork_core::JobId;

use crate::app::errors::{api_error_to_response, json_error};
use crate::app::services::AppServices;

/// `GET /reports/:id`: decrypt and return the original upload.
pub async fn original(
    Extension(services): Extension<Arc<AppServices>>,
    Path(id): Path<String>,
) -> axum::response::Response {
    let job_id: JobId = match id.parse() {
        Ok(id) => id,
        Err(_) => return json_error(StatusCode::BAD_REQUEST, "invalid_id", "invalid job id"),
    };

    match services.retrieval.original(job_id).await {
        Ok(document) => {
            let disposition = format!("attachment; filename=\"{}\"", document.filename);
            (
                StatusCode::OK,
                [
                    (header::CONTENT_TYPE, "application/pdf".to_string()),
                    (header::CONTENT_DISPOSITION, disposition),
                ],
                document.bytes,
            )
                .into_response()
        }
        Err(e) => api_error_to_response(e),
    }
}
