//! HTTP API application wiring (Axum router + service wiring).
//!
//! - `services.rs`: submission/status/retrieval services over the pipeline
//!   trait objects, plus the in-memory vs persistent infra wiring
//! - `routes/`: HTTP routes + handlers (one file per endpoint area)
//! - `dto.rs`: response DTOs and JSON mapping
//! - `errors.rs`: consistent error responses

use std::sync::Arc;

use axum::{Extension, Router};
use tower::ServiceBuilder;

use bloodwork_infra::config::PipelineConfig;

pub mod dto;
pub mod errors;
pub mod routes;
pub mod services;

/// Build the full HTTP router (public entrypoint used by `main.rs`).
pub async fn build_app(config: PipelineConfig) -> anyhow::Result<Router> {
    let services = Arc::new(services::build_services(&config).await?);

    Ok(routes::router()
        .layer(Extension(services))
        .layer(ServiceBuilder::new()))
}
