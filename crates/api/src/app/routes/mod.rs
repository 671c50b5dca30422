use axum::{
    Router,
    routing::{get, post},
};

pub mod analyze;
pub mod reports;
pub mod status;
pub mod system;

pub fn router() -> Router {
    Router::new()
        .route("/", get(system::index))
        .route("/health", get(system::health))
        .route("/analyze", post(analyze::analyze))
        .route("/status/:id", get(status::status))
        .route("/reports/:id", get(reports::original))
}
