//! Payment processor seam.
//!
//! The checkout services only ever create one hosted session and read it back;
//! everything else about payment lives on the processor's side.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::errors::ServiceError;

/// Largest value the processor accepts in a single metadata field, in characters.
pub const METADATA_VALUE_LIMIT: usize = 500;

/// Largest number of keys the processor accepts in one metadata map.
pub const METADATA_KEY_LIMIT: usize = 50;

/// String-to-string metadata attached to a session. Ordered for stable wire output.
pub type SessionMetadata = BTreeMap<String, String>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Paid,
    Unpaid,
    NoPaymentRequired,
    Failed,
}

impl PaymentStatus {
    /// Unknown statuses are treated as failed.
    pub fn parse(raw: &str) -> Self {
        match raw {
            "paid" => PaymentStatus::Paid,
            "unpaid" => PaymentStatus::Unpaid,
            "no_payment_required" => PaymentStatus::NoPaymentRequired,
            _ => PaymentStatus::Failed,
        }
    }

    /// Whether money is settled and an order may be created.
    pub fn is_settled(&self) -> bool {
        matches!(self, PaymentStatus::Paid | PaymentStatus::NoPaymentRequired)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Paid => "paid",
            PaymentStatus::Unpaid => "unpaid",
            PaymentStatus::NoPaymentRequired => "no_payment_required",
            PaymentStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutLineItem {
    pub name: String,
    pub currency: String,
    /// Integer amount in the currency's minor unit
    pub unit_amount: i64,
    pub quantity: u32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CheckoutSessionRequest {
    pub line_item: CheckoutLineItem,
    /// Must contain the processor's session placeholder
    pub success_url: String,
    pub cancel_url: String,
    pub customer_email: Option<String>,
    pub metadata: SessionMetadata,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProcessorSession {
    pub id: String,
    pub url: Option<String>,
    pub payment_status: PaymentStatus,
    pub metadata: SessionMetadata,
    pub customer_email: Option<String>,
    pub amount_total: Option<i64>,
}

#[derive(Debug, Error)]
pub enum ProcessorError {
    #[error("Checkout session not found: {0}")]
    NotFound(String),

    #[error("Session metadata exceeds processor limits: {0}")]
    MetadataTooLarge(String),

    #[error("Processor API error (status {status}): {message}")]
    Api { status: u16, message: String },

    #[error("Processor request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Unexpected processor response: {0}")]
    InvalidResponse(String),
}

impl From<ProcessorError> for ServiceError {
    fn from(err: ProcessorError) -> Self {
        match err {
            ProcessorError::NotFound(id) => {
                ServiceError::NotFound(format!("checkout session {}", id))
            }
            ProcessorError::MetadataTooLarge(msg) => ServiceError::PayloadTooLarge(msg),
            ProcessorError::Transport(e) => ServiceError::ServiceUnavailable(format!(
                "payment processor unreachable: {}",
                e
            )),
            other => ServiceError::ExternalServiceError(other.to_string()),
        }
    }
}

#[async_trait]
pub trait PaymentProcessor: Send + Sync {
    async fn create_checkout_session(
        &self,
        request: CheckoutSessionRequest,
    ) -> Result<ProcessorSession, ProcessorError>;

    async fn retrieve_session(&self, session_id: &str) -> Result<ProcessorSession, ProcessorError>;
}

/// Rejects metadata the processor would refuse, before any network call.
pub fn check_metadata_limits(metadata: &SessionMetadata) -> Result<(), ProcessorError> {
    if metadata.len() > METADATA_KEY_LIMIT {
        return Err(ProcessorError::MetadataTooLarge(format!(
            "{} keys exceeds the limit of {}",
            metadata.len(),
            METADATA_KEY_LIMIT
        )));
    }
    if let Some((key, value)) = metadata
        .iter()
        .find(|(_, value)| value.chars().count() > METADATA_VALUE_LIMIT)
    {
        return Err(ProcessorError::MetadataTooLarge(format!(
            "value for '{}' is {} characters, limit is {}",
            key,
            value.chars().count(),
            METADATA_VALUE_LIMIT
        )));
    }
    Ok(())
}
