use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, error, instrument, warn};

use super::payment_processor::{
    check_metadata_limits, CheckoutSessionRequest, PaymentProcessor, PaymentStatus,
    ProcessorError, ProcessorSession, SessionMetadata,
};
use crate::config::AppConfig;

const CHECKOUT_SESSIONS_PATH: &str = "/v1/checkout/sessions";

/// Stripe Checkout over the REST API (form-encoded requests, JSON responses).
#[derive(Clone)]
pub struct StripeClient {
    client: reqwest::Client,
    api_base: String,
    secret_key: String,
    api_version: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeCheckoutSession {
    id: String,
    url: Option<String>,
    payment_status: Option<String>,
    #[serde(default)]
    metadata: Option<SessionMetadata>,
    customer_email: Option<String>,
    customer_details: Option<StripeCustomerDetails>,
    amount_total: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct StripeCustomerDetails {
    email: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StripeErrorEnvelope {
    error: StripeErrorBody,
}

#[derive(Debug, Deserialize)]
struct StripeErrorBody {
    #[serde(rename = "type")]
    kind: Option<String>,
    code: Option<String>,
    message: Option<String>,
    param: Option<String>,
}

impl From<StripeCheckoutSession> for ProcessorSession {
    fn from(raw: StripeCheckoutSession) -> Self {
        let customer_email = raw
            .customer_email
            .or_else(|| raw.customer_details.and_then(|details| details.email));
        ProcessorSession {
            id: raw.id,
            url: raw.url,
            payment_status: raw
                .payment_status
                .as_deref()
                .map(PaymentStatus::parse)
                .unwrap_or(PaymentStatus::Unpaid),
            metadata: raw.metadata.unwrap_or_default(),
            customer_email,
            amount_total: raw.amount_total,
        }
    }
}

impl StripeClient {
    pub fn new(
        api_base: impl Into<String>,
        secret_key: impl Into<String>,
        api_version: Option<String>,
        timeout: Duration,
    ) -> Result<Self, ProcessorError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            api_base: api_base.into().trim_end_matches('/').to_string(),
            secret_key: secret_key.into(),
            api_version,
        })
    }

    pub fn from_config(config: &AppConfig) -> Result<Self, ProcessorError> {
        Self::new(
            config.stripe_api_base.clone(),
            config.stripe_secret_key.clone(),
            config.stripe_api_version.clone(),
            config.stripe_timeout(),
        )
    }

    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        let builder = self
            .client
            .request(method, format!("{}{}", self.api_base, path))
            .bearer_auth(&self.secret_key);
        match &self.api_version {
            Some(version) => builder.header("Stripe-Version", version),
            None => builder,
        }
    }

    /// Form body in Stripe's bracketed encoding.
    fn session_form(request: &CheckoutSessionRequest) -> Vec<(String, String)> {
        let item = &request.line_item;
        let mut form = vec![
            ("mode".to_string(), "payment".to_string()),
            ("success_url".to_string(), request.success_url.clone()),
            ("cancel_url".to_string(), request.cancel_url.clone()),
            (
                "line_items[0][price_data][currency]".to_string(),
                item.currency.clone(),
            ),
            (
                "line_items[0][price_data][unit_amount]".to_string(),
                item.unit_amount.to_string(),
            ),
            (
                "line_items[0][price_data][product_data][name]".to_string(),
                item.name.clone(),
            ),
            (
                "line_items[0][quantity]".to_string(),
                item.quantity.to_string(),
            ),
        ];
        if let Some(email) = &request.customer_email {
            form.push(("customer_email".to_string(), email.clone()));
        }
        form.extend(
            request
                .metadata
                .iter()
                .map(|(key, value)| (format!("metadata[{}]", key), value.clone())),
        );
        form
    }

    async fn read_session(response: reqwest::Response) -> Result<ProcessorSession, ProcessorError> {
        let session: StripeCheckoutSession = response
            .json()
            .await
            .map_err(|e| ProcessorError::InvalidResponse(e.to_string()))?;
        Ok(session.into())
    }

    async fn api_error(response: reqwest::Response) -> ProcessorError {
        let status = response.status().as_u16();
        let body = response.text().await.unwrap_or_default();
        let parsed = serde_json::from_str::<StripeErrorEnvelope>(&body).ok();

        let message = parsed
            .as_ref()
            .and_then(|env| env.error.message.clone())
            .unwrap_or_else(|| crate::tracing::limit_body(&body, 512));

        let touches_metadata = parsed
            .as_ref()
            .and_then(|env| env.error.param.as_deref())
            .map_or(false, |param| param.starts_with("metadata"));
        if touches_metadata {
            return ProcessorError::MetadataTooLarge(message);
        }

        if let Some(env) = &parsed {
            warn!(
                status,
                error_type = env.error.kind.as_deref().unwrap_or("unknown"),
                error_code = env.error.code.as_deref().unwrap_or("unknown"),
                "Stripe rejected request: {}",
                message
            );
        }
        ProcessorError::Api { status, message }
    }
}

#[async_trait]
impl PaymentProcessor for StripeClient {
    #[instrument(skip(self, request), fields(metadata_keys = request.metadata.len()))]
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<ProcessorSession, ProcessorError> {
        check_metadata_limits(&request.metadata)?;

        let response = self
            .request(reqwest::Method::POST, CHECKOUT_SESSIONS_PATH)
            .form(&Self::session_form(&request))
            .send()
            .await
            .map_err(|e| {
                error!("Stripe session creation failed to send: {}", e);
                ProcessorError::Transport(e)
            })?;

        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }

        let session = Self::read_session(response).await?;
        debug!(session_id = %session.id, "Created Stripe checkout session");
        Ok(session)
    }

    #[instrument(skip(self))]
    async fn retrieve_session(&self, session_id: &str) -> Result<ProcessorSession, ProcessorError> {
        let path = format!("{}/{}", CHECKOUT_SESSIONS_PATH, session_id);
        let response = self
            .request(reqwest::Method::GET, &path)
            .send()
            .await
            .map_err(|e| {
                error!(session_id, "Stripe session retrieval failed to send: {}", e);
                ProcessorError::Transport(e)
            })?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(ProcessorError::NotFound(session_id.to_string()));
        }
        if !response.status().is_success() {
            return Err(Self::api_error(response).await);
        }

        Self::read_session(response).await
    }
}
