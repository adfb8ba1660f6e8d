//! Grodify checkout service
//!
//! Opens hosted payment sessions that carry the customer's order, and turns
//! paid sessions into orders in the external order-management backend.
#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]
#![warn(clippy::all, clippy::perf, clippy::dbg_macro)]

pub mod cache;
pub mod config;
pub mod errors;
pub mod handlers;
pub mod middleware_helpers;
pub mod models;
pub mod services;
pub mod tracing;
pub mod webhooks;

use std::time::Instant;

use axum::{
    routing::{get, post},
    Router,
};
use chrono::Utc;
use serde::Serialize;

// App state definition
#[derive(Clone)]
pub struct AppState {
    pub config: config::AppConfig,
    pub services: handlers::AppServices,
    pub started_at: Instant,
}

impl AppState {
    pub fn new(config: config::AppConfig, services: handlers::AppServices) -> Self {
        Self {
            config,
            services,
            started_at: Instant::now(),
        }
    }
}

// Common response wrappers
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub meta: Option<ResponseMeta>,
}

#[derive(Debug, Serialize)]
pub struct ResponseMeta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_id: Option<String>,
    pub timestamp: String,
}

impl ResponseMeta {
    fn capture() -> Self {
        Self {
            request_id: crate::tracing::current_request_id().map(|rid| rid.as_str().to_string()),
            timestamp: Utc::now().to_rfc3339(),
        }
    }
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            meta: Some(ResponseMeta::capture()),
        }
    }
}


/// Routes mounted under `/api`.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/status", get(handlers::health::api_status))
        .nest("/checkout", handlers::checkout::checkout_routes())
        // Signature-verified, no other auth
        .route(
            "/payments/webhook",
            post(handlers::payment_webhooks::payment_webhook),
        )
        .nest(
            "/temp-order-storage",
            handlers::temp_order_storage::temp_order_storage_routes(),
        )
}

/// Full application router with tracing and request-id layers applied.
pub fn app_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health::liveness_check))
        .nest("/api", api_routes())
        .layer(crate::tracing::configure_http_tracing())
        // Ensure every request carries a request id for traceability
        .layer(axum::middleware::from_fn(
            middleware_helpers::request_id::request_id_middleware,
        ))
        .with_state(state)
}
