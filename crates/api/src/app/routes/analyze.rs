use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Multipart},
    http::StatusCode,
    response::IntoResponse,
};

use crate::app::dto::AnalyzeResponse;
use crate::app::errors::{api_error_to_response, json_error};
use crate::app::services::AppServices;

/// `POST /analyze`: multipart upload with a `file` part and an optional
/// `query` part.
pub async fn analyze(
    Extension(services): Extension<Arc<AppServices>>,
    mut multipart: Multipart,
) -> axum::response::Response {
    let mut file: Option<(String, Vec<u8>)> = None;
    let mut query: Option<String> = None;

    loop {
        let field = match multipart.next_field().await {
            Ok(Some(field)) => field,
            Ok(None) => break,
            Err(e) => {
                return json_error(StatusCode::BAD_REQUEST, "invalid_multipart", e.to_string());
            }
        };

        let name = field.name().map(|n| n.to_string());
        match name.as_deref() {
            Some("file") => {
                let filename = field
                    .file_name()
                    .map(|name| name.to_string())
                    .unwrap_or_default();
                match field.bytes().await {
                    Ok(bytes) => file = Some((filename, bytes.to_vec())),
                    Err(e) => {
                        return json_error(
                            StatusCode::BAD_REQUEST,
                            "invalid_multipart",
                            e.to_string(),
                        );
                    }
                }
            }
            Some("query") => match field.text().await {
                Ok(text) => query = Some(text),
                Err(e) => {
                    return json_error(StatusCode::BAD_REQUEST, "invalid_multipart", e.to_string());
                }
            },
            _ => {}
        }
    }

    let Some((filename, bytes)) = file else {
        return json_error(
            StatusCode::BAD_REQUEST,
            "missing_file",
            "multipart field 'file' is required",
        );
    };

    match services.submission.submit(&filename, &bytes, query).await {
        Ok(receipt) => (StatusCode::OK, Json(AnalyzeResponse::from(receipt))).into_response(),
        Err(e) => api_error_to_response(e),
    }
}
