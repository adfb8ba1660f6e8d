use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::{
    errors::ServiceError, handlers::common::parse_json_body, webhooks::SIGNATURE_HEADER, AppState,
};

const COMPLETION_EVENTS: [&str; 2] = [
    "checkout.session.completed",
    "checkout.session.async_payment_succeeded",
];

#[derive(Debug, Deserialize)]
pub struct WebhookEvent {
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub data: WebhookEventData,
}

#[derive(Debug, Default, Deserialize)]
pub struct WebhookEventData {
    #[serde(default)]
    pub object: Value,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookAck {
    pub received: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub event_id: Option<String>,
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order_id: Option<String>,
}

// POST /api/payments/webhook
pub async fn payment_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ServiceError> {
    if let Some(verifier) = &state.services.webhook_verifier {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|h| h.to_str().ok())
            .ok_or_else(|| ServiceError::Unauthorized("missing webhook signature".to_string()))?;
        verifier
            .verify(signature, &body, chrono::Utc::now().timestamp())
            .map_err(|e| {
                warn!("Payment webhook signature verification failed: {}", e);
                ServiceError::Unauthorized("invalid webhook signature".to_string())
            })?;
    }

    let event: WebhookEvent = parse_json_body(&body)?;

    if !COMPLETION_EVENTS.contains(&event.event_type.as_str()) {
        info!(event_type = %event.event_type, "Ignoring payment webhook event");
        return Ok(Json(WebhookAck {
            received: true,
            event_id: event.id,
            outcome: "ignored",
            order_id: None,
        })
        .into_response());
    }

    let session_id = event.data.object.get("id").and_then(Value::as_str);
    let outcome = state
        .services
        .checkout_completion
        .complete(session_id)
        .await;
    info!(
        event_id = ?event.id,
        event_type = %event.event_type,
        outcome = outcome.code(),
        "Processed checkout webhook"
    );

    // 503 asks the sender to redeliver after a transient failure.
    let status = if outcome.is_retryable() {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    let ack = WebhookAck {
        received: true,
        event_id: event.id,
        outcome: outcome.code(),
        order_id: outcome.order_id().map(str::to_string),
    };
    Ok((status, Json(ack)).into_response())
}
