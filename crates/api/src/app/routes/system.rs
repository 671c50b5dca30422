use axum::{Json, http::StatusCode, response::IntoResponse};

pub async fn index() -> impl IntoResponse {
    Json(serde_json::json!({
        "message": "Blood Test Report Analyser API is running",
    }))
}

pub async fn health() -> StatusCode {
    StatusCode::OK
}
