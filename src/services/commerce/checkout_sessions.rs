use std::sync::Arc;

use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::{Decimal, RoundingStrategy};
use serde::Serialize;
use tracing::{info, instrument, warn};
use validator::Validate;

use super::envelope_codec::{self, EncodedEnvelope};
use crate::cache::CorrelationStore;
use crate::config::AppConfig;
use crate::errors::ServiceError;
use crate::models::OrderEnvelope;
use crate::services::payment_processor::{
    CheckoutLineItem, CheckoutSessionRequest, PaymentProcessor, ProcessorError, ProcessorSession,
    SessionMetadata, METADATA_KEY_LIMIT, METADATA_VALUE_LIMIT,
};

/// Placeholder the processor replaces with the session id on redirect.
pub const SESSION_ID_PLACEHOLDER: &str = "{CHECKOUT_SESSION_ID}";
pub const SUCCESS_CALLBACK_PATH: &str = "/api/checkout/success";
pub const ORDER_DATA_STORAGE_KEY: &str = "orderDataStorage";
pub const FALLBACK_LINE_ITEM_NAME: &str = "Custom Flyer Order";

#[derive(Debug, Clone)]
pub struct CreateCheckoutSessionInput {
    /// Charge in major currency units; defaults to the envelope's total
    pub amount: Option<f64>,
    pub envelope: OrderEnvelope,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderDataStorage {
    Metadata,
    CorrelationStore,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckoutSessionCreated {
    pub session_id: String,
    pub url: Option<String>,
    pub order_data_storage: OrderDataStorage,
}

/// Opens hosted checkout sessions carrying the order in their metadata.
pub struct CheckoutSessionService {
    processor: Arc<dyn PaymentProcessor>,
    correlation_store: Arc<dyn CorrelationStore>,
    currency: String,
    default_flyer_id: String,
    success_url: String,
    cancel_url: String,
    correlation_fallback_enabled: bool,
}

impl CheckoutSessionService {
    pub fn new(
        config: &AppConfig,
        processor: Arc<dyn PaymentProcessor>,
        correlation_store: Arc<dyn CorrelationStore>,
    ) -> Self {
        let base = config.public_base();
        Self {
            processor,
            correlation_store,
            currency: config.checkout_currency.to_ascii_lowercase(),
            default_flyer_id: config.default_flyer_id.clone(),
            success_url: format!(
                "{}{}?session_id={}",
                base, SUCCESS_CALLBACK_PATH, SESSION_ID_PLACEHOLDER
            ),
            cancel_url: format!("{}{}", base, config.cancel_path),
            correlation_fallback_enabled: config.correlation_fallback_enabled,
        }
    }

    #[instrument(skip(self, input), fields(user_id = %input.envelope.user_id))]
    pub async fn create_session(
        &self,
        input: CreateCheckoutSessionInput,
    ) -> Result<CheckoutSessionCreated, ServiceError> {
        let envelope = input.envelope;
        envelope.validate()?;

        let total_minor = to_minor_units(envelope.form_data.total_price)?;
        let unit_amount = match input.amount {
            Some(amount) => {
                let charged = to_minor_units(amount)?;
                if charged != total_minor {
                    return Err(ServiceError::ValidationError(format!(
                        "amount {} does not match order total {}",
                        amount, envelope.form_data.total_price
                    )));
                }
                charged
            }
            None => total_minor,
        };

        let line_item = CheckoutLineItem {
            name: envelope
                .event_title()
                .unwrap_or(FALLBACK_LINE_ITEM_NAME)
                .to_string(),
            currency: self.currency.clone(),
            unit_amount,
            quantity: 1,
        };

        let identifying = self.identifying_metadata(&envelope);
        let encoded = envelope_codec::encode(&envelope)?;

        let session = if identifying.len() + encoded.metadata_keys_needed() <= METADATA_KEY_LIMIT {
            match self
                .open_session(line_item.clone(), &envelope, with_payload(&identifying, &encoded))
                .await
            {
                Ok(session) => {
                    return Ok(created(session, OrderDataStorage::Metadata));
                }
                Err(ProcessorError::MetadataTooLarge(reason)) if self.correlation_fallback_enabled => {
                    warn!(%reason, "Processor refused order metadata; using correlation store");
                    self.open_session(line_item, &envelope, with_correlation_marker(&identifying))
                        .await?
                }
                Err(e) => return Err(e.into()),
            }
        } else if self.correlation_fallback_enabled {
            warn!(
                chunks = encoded.chunk_count(),
                "Order data exceeds metadata capacity; using correlation store"
            );
            self.open_session(line_item, &envelope, with_correlation_marker(&identifying))
                .await?
        } else {
            return Err(ServiceError::PayloadTooLarge(format!(
                "order data needs {} metadata fields, at most {} are available",
                encoded.metadata_keys_needed(),
                METADATA_KEY_LIMIT.saturating_sub(identifying.len())
            )));
        };

        self.correlation_store.put(&session.id, &envelope).await?;
        info!(
            session_id = %session.id,
            backend = self.correlation_store.backend_name(),
            "Stashed order data in correlation store"
        );
        Ok(created(session, OrderDataStorage::CorrelationStore))
    }

    async fn open_session(
        &self,
        line_item: CheckoutLineItem,
        envelope: &OrderEnvelope,
        metadata: SessionMetadata,
    ) -> Result<ProcessorSession, ProcessorError> {
        let customer_email = Some(envelope.user_email.trim())
            .filter(|email| !email.is_empty())
            .map(str::to_string);
        let session = self
            .processor
            .create_checkout_session(CheckoutSessionRequest {
                line_item,
                success_url: self.success_url.clone(),
                cancel_url: self.cancel_url.clone(),
                customer_email,
                metadata,
            })
            .await?;
        info!(session_id = %session.id, "Checkout session created");
        Ok(session)
    }

    fn identifying_metadata(&self, envelope: &OrderEnvelope) -> SessionMetadata {
        let form = &envelope.form_data;
        let flyer_id = form
            .flyer_is
            .as_deref()
            .filter(|id| !id.trim().is_empty())
            .unwrap_or(self.default_flyer_id.as_str());

        [
            ("userId", envelope.user_id.as_str()),
            ("userEmail", envelope.user_email.as_str()),
            ("flyerId", flyer_id),
            ("totalPrice", form.total_price.to_string().as_str()),
            ("eventTitle", envelope.event_title().unwrap_or_default()),
        ]
        .into_iter()
        .map(|(key, value)| (key.to_string(), truncate_chars(value, METADATA_VALUE_LIMIT)))
        .collect()
    }
}

/// Converts a major-unit amount to integer minor units, rounding half away from zero.
pub fn to_minor_units(amount: f64) -> Result<i64, ServiceError> {
    if !amount.is_finite() || amount < 0.0 {
        return Err(ServiceError::ValidationError(format!(
            "amount must be a finite, non-negative number, got {}",
            amount
        )));
    }
    Decimal::from_f64(amount)
        .map(|major| {
            (major * Decimal::ONE_HUNDRED)
                .round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
        })
        .and_then(|minor| minor.to_i64())
        .ok_or_else(|| ServiceError::ValidationError(format!("amount {} is out of range", amount)))
}

fn with_payload(identifying: &SessionMetadata, encoded: &EncodedEnvelope) -> SessionMetadata {
    let mut metadata = identifying.clone();
    encoded.write_metadata(&mut metadata);
    metadata
}

fn with_correlation_marker(identifying: &SessionMetadata) -> SessionMetadata {
    let mut metadata = identifying.clone();
    metadata.insert(ORDER_DATA_STORAGE_KEY.to_string(), "correlation".to_string());
    metadata
}

fn created(session: ProcessorSession, storage: OrderDataStorage) -> CheckoutSessionCreated {
    CheckoutSessionCreated {
        session_id: session.id,
        url: session.url,
        order_data_storage: storage,
    }
}

fn truncate_chars(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}
