use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{de::DeserializeOwned, Serialize};

use crate::{errors::ServiceError, ApiResponse};

/// Standard created response
pub fn created_response<T: Serialize>(data: T) -> Response {
    (StatusCode::CREATED, Json(ApiResponse::success(data))).into_response()
}

/// Parses a JSON request body, reporting malformed input as a 400.
pub fn parse_json_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ServiceError> {
    if body.is_empty() {
        return Err(ServiceError::BadRequest("request body is empty".to_string()));
    }
    serde_json::from_slice(body)
        .map_err(|e| ServiceError::BadRequest(format!("invalid request body: {}", e)))
}

/// Trims a required string field, rejecting blanks.
pub fn require_non_empty(value: Option<&str>, field: &str) -> Result<String, ServiceError> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(str::to_string)
        .ok_or_else(|| ServiceError::BadRequest(format!("{} is required", field)))
}
