use axum::{
    body::Bytes,
    extract::{Query, State},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use tracing::info;

use crate::{
    errors::ServiceError,
    handlers::common::{created_response, parse_json_body},
    models::OrderEnvelope,
    services::commerce::CreateCheckoutSessionInput,
    AppState,
};

/// Creates the router for checkout endpoints
pub fn checkout_routes() -> Router<AppState> {
    Router::new()
        .route("/sessions", post(create_checkout_session))
        .route("/success", get(checkout_success))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateCheckoutSessionRequest {
    #[serde(default, deserialize_with = "crate::models::order_envelope::optional_amount")]
    pub amount: Option<f64>,
    pub order_data: OrderEnvelope,
}

#[derive(Debug, Deserialize)]
pub struct CheckoutSuccessQuery {
    pub session_id: Option<String>,
}

/// Opens a hosted checkout session for the submitted order.
async fn create_checkout_session(
    State(state): State<AppState>,
    body: Bytes,
) -> Result<Response, ServiceError> {
    let request: CreateCheckoutSessionRequest = parse_json_body(&body)?;

    let created = state
        .services
        .checkout_sessions
        .create_session(CreateCheckoutSessionInput {
            amount: request.amount,
            envelope: request.order_data,
        })
        .await?;

    Ok(created_response(created))
}

/// Processor redirect target after payment; always answers with a redirect.
async fn checkout_success(
    State(state): State<AppState>,
    Query(query): Query<CheckoutSuccessQuery>,
) -> Response {
    let completion = &state.services.checkout_completion;
    let outcome = completion.complete(query.session_id.as_deref()).await;
    let target = outcome.redirect_target(completion.redirect_targets());
    info!(outcome = outcome.code(), %target, "Redirecting after checkout");
    Redirect::to(&target).into_response()
}
