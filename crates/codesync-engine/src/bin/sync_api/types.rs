use axum::Json;
use axum::http::StatusCode;
use codesync_engine::transport::ErrorBody;
use serde::Serialize;

/// Error half of every handler result
pub type ApiError = (StatusCode, Json<ErrorBody>);

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub deriver: String,
    pub index: String,
    pub store: String,
}
