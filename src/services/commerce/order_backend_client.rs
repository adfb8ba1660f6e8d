use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::{error, info, instrument, warn};

use super::backend_order::{extract_order_id, BackendOrderRequest};
use crate::tracing::limit_body;

const ORDERS_PATH: &str = "/api/orders";
const LOGGED_BODY_LIMIT: usize = 512;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedOrder {
    pub order_id: String,
}

#[derive(Debug, Error)]
pub enum OrderBackendError {
    #[error("Order backend rejected the order (status {status})")]
    Rejected { status: u16, body: String },

    #[error("Order backend unreachable: {0}")]
    Unavailable(String),

    #[error("Order backend did not answer in time")]
    Timeout,
}

/// External order-management service.
#[async_trait]
pub trait OrderBackend: Send + Sync {
    /// Creates one order. `idempotency_key` is forwarded so the backend can deduplicate.
    async fn create_order(
        &self,
        request: BackendOrderRequest,
        idempotency_key: &str,
    ) -> Result<CreatedOrder, OrderBackendError>;
}

#[derive(Clone)]
pub struct OrderBackendClient {
    client: reqwest::Client,
    base_url: String,
}

impl OrderBackendClient {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, reqwest::Error> {
        Ok(Self {
            client: reqwest::Client::builder().timeout(timeout).build()?,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    fn orders_url(&self) -> String {
        format!("{}{}", self.base_url, ORDERS_PATH)
    }
}

#[async_trait]
impl OrderBackend for OrderBackendClient {
    #[instrument(skip(self, request), fields(fields = request.fields().len()))]
    async fn create_order(
        &self,
        request: BackendOrderRequest,
        idempotency_key: &str,
    ) -> Result<CreatedOrder, OrderBackendError> {
        let form = request.into_multipart();

        let response = self
            .client
            .post(self.orders_url())
            .header("Idempotency-Key", idempotency_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    error!(idempotency_key, "Order backend timed out");
                    OrderBackendError::Timeout
                } else {
                    error!(idempotency_key, "Order backend request failed: {}", e);
                    OrderBackendError::Unavailable(e.to_string())
                }
            })?;

        let status = response.status();
        let body = match response.text().await {
            Ok(body) => body,
            Err(e) if e.is_timeout() => return Err(OrderBackendError::Timeout),
            Err(e) => {
                warn!(status = status.as_u16(), "Could not read order backend response: {}", e);
                String::new()
            }
        };

        if !status.is_success() {
            error!(
                idempotency_key,
                status = status.as_u16(),
                body = %limit_body(&body, LOGGED_BODY_LIMIT),
                "Order backend returned non-success status"
            );
            return Err(OrderBackendError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: Value = serde_json::from_str(&body).unwrap_or(Value::Null);
        if parsed.get("success").and_then(Value::as_bool) == Some(false) {
            error!(
                idempotency_key,
                status = status.as_u16(),
                body = %limit_body(&body, LOGGED_BODY_LIMIT),
                "Order backend reported success=false"
            );
            return Err(OrderBackendError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let order_id = extract_order_id(&parsed);
        if order_id == super::backend_order::UNKNOWN_ORDER_ID {
            warn!(
                idempotency_key,
                body = %limit_body(&body, LOGGED_BODY_LIMIT),
                "Order created but response carried no recognisable order id"
            );
        }
        info!(idempotency_key, order_id = %order_id, "Order created in backend");
        Ok(CreatedOrder { order_id })
    }
}
