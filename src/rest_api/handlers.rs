//! HTTP handlers for the REST API

use axum::Json;
use serde::Serialize;
use tracing::instrument;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
}

/// Health check endpoint
#[instrument]
pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Metrics endpoint handler
pub async fn metrics() -> String {
    use prometheus_client::encoding::text::encode;
    let mut buffer = String::new();
    if let Err(e) = encode(&mut buffer, &crate::controller::metrics::REGISTRY) {
        tracing::error!("Failed to encode metrics: {}", e);
    }
    buffer
}
