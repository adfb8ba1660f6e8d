use axum::{extract::State, response::Json};
use serde::Serialize;

use crate::{errors::ServiceError, ApiResponse, AppState};

/// Liveness payload
#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
    pub timestamp: String,
    pub uptime_secs: u64,
    pub correlation_store: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub struct StatusResponse {
    pub status: &'static str,
    pub service: &'static str,
    pub version: &'static str,
    pub git: &'static str,
    pub environment: String,
    pub webhook_verification: bool,
}

/// GET /health
pub async fn liveness_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "up",
        version: env!("CARGO_PKG_VERSION"),
        timestamp: chrono::Utc::now().to_rfc3339(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        correlation_store: state.services.correlation_store.backend_name(),
    })
}

/// GET /api/status
pub async fn api_status(
    State(state): State<AppState>,
) -> Result<Json<ApiResponse<StatusResponse>>, ServiceError> {
    Ok(Json(ApiResponse::success(StatusResponse {
        status: "ok",
        service: env!("CARGO_PKG_NAME"),
        version: env!("CARGO_PKG_VERSION"),
        git: option_env!("GIT_HASH").unwrap_or("unknown"),
        environment: state.config.environment.clone(),
        webhook_verification: state.services.webhook_verifier.is_some(),
    })))
}
