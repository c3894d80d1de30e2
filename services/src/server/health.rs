//! Liveness endpoint.

use axum::{Json, http::StatusCode};
use serde::{Deserialize, Serialize};

/// Health check response.
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Service name
    pub service: String,
    /// Service version
    pub version: String,
}

/// Health check endpoint.
///
/// Returns 200 OK while the process is up. Does not check the broker.
///
/// ```bash
/// curl http://localhost:8080/health
/// # {"status":"healthy","service":"order-service","version":"0.1.0"}
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, Json<HealthResponse>) {
    (
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            service: "order-service".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }),
    )
}
