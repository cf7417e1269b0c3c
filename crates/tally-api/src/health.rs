//! Health check endpoint

use axum::{Json, Router, routing::get};
use serde::Serialize;

/// Health status response
#[derive(Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Create health routes
pub fn routes() -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/healthz", get(health))
}
