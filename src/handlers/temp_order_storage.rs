//! HTTP facade over the correlation store for clients that stash order data
//! themselves before redirecting to checkout.

use axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    errors::ServiceError,
    handlers::common::{parse_json_body, require_non_empty},
    models::OrderEnvelope,
    AppState,
};

pub fn temp_order_storage_routes() -> Router<AppState> {
    Router::new().route(
        "/",
        post(store_order_data)
            .get(fetch_order_data)
            .delete(delete_order_data),
    )
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StoreOrderDataRequest {
    pub session_id: Option<String>,
    pub order_data: OrderEnvelope,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionKeyQuery {
    pub session_id: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteOrderDataRequest {
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredOrderData {
    pub success: bool,
    pub session_id: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FetchedOrderData {
    pub success: bool,
    pub order_data: OrderEnvelope,
}

async fn store_order_data(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ServiceError> {
    let request: StoreOrderDataRequest = parse_json_body(&body)?;
    let session_id = require_non_empty(request.session_id.as_deref(), "sessionId")?;

    state
        .services
        .correlation_store
        .put(&session_id, &request.order_data)
        .await?;
    info!(%session_id, "Stored temporary order data");

    Ok((
        StatusCode::CREATED,
        Json(StoredOrderData {
            success: true,
            session_id,
        }),
    )
        .into_response())
}

async fn fetch_order_data(
    State(state): State<AppState>,
    Query(query): Query<SessionKeyQuery>,
) -> Result<Json<FetchedOrderData>, ServiceError> {
    let session_id = require_non_empty(query.session_id.as_deref(), "sessionId")?;

    let order_data = state
        .services
        .correlation_store
        .get(&session_id)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("order data for session {}", session_id)))?;

    Ok(Json(FetchedOrderData {
        success: true,
        order_data,
    }))
}

async fn delete_order_data(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let request: DeleteOrderDataRequest = parse_json_body(&body)?;
    let session_id = require_non_empty(request.session_id.as_deref(), "sessionId")?;

    state
        .services
        .correlation_store
        .delete(&session_id)
        .await?;
    info!(%session_id, "Deleted temporary order data");

    Ok(Json(serde_json::json!({ "success": true })))
}
