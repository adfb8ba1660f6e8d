//! Turns a paid checkout session into an order in the external order backend.
//!
//! Guards run strictly in order: session reference present, session retrievable,
//! payment settled, order data recoverable. Only then is the order posted. Every
//! path ends in a [`CompletionOutcome`]; nothing is propagated as an error because
//! the browser must always be sent somewhere meaningful.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{error, info, instrument, warn};
use url::Url;

use super::backend_order::{BackendOrderRequest, OrderDefaults};
use super::envelope_codec::{self, EnvelopeRecoveryError};
use super::order_backend_client::{OrderBackend, OrderBackendError};
use crate::cache::CorrelationStore;
use crate::config::AppConfig;
use crate::models::OrderEnvelope;
use crate::services::payment_processor::{
    PaymentProcessor, PaymentStatus, ProcessorError, ProcessorSession,
};

const COMPLETED_RETENTION: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionReason {
    MissingSessionId,
    SessionNotFound,
    ProcessorUnavailable,
    PaymentFailed,
    OrderDataNotFound,
    OrderDataIncomplete,
    DecodeFailed,
    OrderBackendRejected,
    OrderBackendUnavailable,
    OrderBackendTimeout,
}

impl CompletionReason {
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingSessionId => "missing_session_id",
            Self::SessionNotFound => "session_not_found",
            Self::ProcessorUnavailable => "processor_unavailable",
            Self::PaymentFailed => "payment_failed",
            Self::OrderDataNotFound => "order_data_not_found",
            Self::OrderDataIncomplete => "order_data_incomplete",
            Self::DecodeFailed => "decode_failed",
            Self::OrderBackendRejected => "order_backend_rejected",
            Self::OrderBackendUnavailable => "order_backend_unavailable",
            Self::OrderBackendTimeout => "order_backend_timeout",
        }
    }

    pub fn message(&self) -> &'static str {
        match self {
            Self::MissingSessionId => "Missing checkout session reference",
            Self::SessionNotFound => "Checkout session not found",
            Self::ProcessorUnavailable => "Payment provider unavailable, please try again",
            Self::PaymentFailed => "Payment was not completed",
            Self::OrderDataNotFound => {
                "Order data not found. Your payment was received and our team will follow up"
            }
            Self::OrderDataIncomplete => {
                "Order data was incomplete. Your payment was received and our team will follow up"
            }
            Self::DecodeFailed => {
                "Order data could not be read. Your payment was received and our team will follow up"
            }
            Self::OrderBackendRejected => {
                "Your order could not be created. Your payment was received and our team will follow up"
            }
            Self::OrderBackendUnavailable => {
                "Order service unavailable. Your payment was received and our team will follow up"
            }
            Self::OrderBackendTimeout => {
                "Order service timed out. Your payment was received and our team will follow up"
            }
        }
    }
}

impl From<&OrderBackendError> for CompletionReason {
    fn from(err: &OrderBackendError) -> Self {
        match err {
            OrderBackendError::Rejected { .. } => CompletionReason::OrderBackendRejected,
            OrderBackendError::Unavailable(_) => CompletionReason::OrderBackendUnavailable,
            OrderBackendError::Timeout => CompletionReason::OrderBackendTimeout,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionOutcome {
    MissingSessionId,
    SessionNotFound {
        session_id: String,
    },
    ProcessorUnavailable {
        session_id: String,
    },
    PaymentNotCompleted {
        session_id: String,
        payment_status: PaymentStatus,
    },
    /// Paid, but the order data could not be recovered.
    EnvelopeUnavailable {
        session_id: String,
        reason: CompletionReason,
    },
    /// Paid, but the order backend did not create the order.
    OrderRejected {
        session_id: String,
        reason: CompletionReason,
    },
    OrderCreated {
        session_id: String,
        order_id: String,
    },
    /// This session was already turned into an order by an earlier completion.
    AlreadyCompleted {
        session_id: String,
        order_id: String,
    },
}

/// Where the browser lands after completion.
#[derive(Debug, Clone)]
pub struct RedirectTargets {
    pub public_base: String,
    pub confirmation_path: String,
    pub error_path: String,
}

impl RedirectTargets {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            public_base: config.public_base().to_string(),
            confirmation_path: config.confirmation_path.clone(),
            error_path: config.error_path.clone(),
        }
    }

    fn build(&self, path: &str, params: &[(&str, &str)]) -> String {
        let raw = format!("{}{}", self.public_base, path);
        match Url::parse(&raw) {
            Ok(mut url) => {
                url.query_pairs_mut().extend_pairs(params.iter().copied());
                url.into()
            }
            Err(e) => {
                error!(target = %raw, "Redirect target is not a valid URL: {}", e);
                raw
            }
        }
    }

    /// Error page with the reason code and its message. `session_id` is passed
    /// only once payment has been captured.
    fn error_page(&self, reason: CompletionReason, session_id: Option<&str>) -> String {
        let mut params = Vec::with_capacity(3);
        if let Some(session_id) = session_id {
            params.push(("session_id", session_id));
        }
        params.push(("reason", reason.code()));
        params.push(("error", reason.message()));
        self.build(&self.error_path, &params)
    }
}

impl CompletionOutcome {
    pub fn reason(&self) -> Option<CompletionReason> {
        match self {
            Self::MissingSessionId => Some(CompletionReason::MissingSessionId),
            Self::SessionNotFound { .. } => Some(CompletionReason::SessionNotFound),
            Self::ProcessorUnavailable { .. } => Some(CompletionReason::ProcessorUnavailable),
            Self::PaymentNotCompleted { .. } => Some(CompletionReason::PaymentFailed),
            Self::EnvelopeUnavailable { reason, .. } | Self::OrderRejected { reason, .. } => {
                Some(*reason)
            }
            Self::OrderCreated { .. } | Self::AlreadyCompleted { .. } => None,
        }
    }

    /// Machine-readable outcome code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::OrderCreated { .. } => "order_created",
            Self::AlreadyCompleted { .. } => "already_completed",
            other => other.reason().map_or("unknown", |reason| reason.code()),
        }
    }

    pub fn order_created(&self) -> bool {
        matches!(self, Self::OrderCreated { .. } | Self::AlreadyCompleted { .. })
    }

    /// True once the processor has confirmed the money was taken.
    pub fn payment_captured(&self) -> bool {
        matches!(
            self,
            Self::EnvelopeUnavailable { .. }
                | Self::OrderRejected { .. }
                | Self::OrderCreated { .. }
                | Self::AlreadyCompleted { .. }
        )
    }

    pub fn order_id(&self) -> Option<&str> {
        match self {
            Self::OrderCreated { order_id, .. } | Self::AlreadyCompleted { order_id, .. } => {
                Some(order_id)
            }
            _ => None,
        }
    }

    /// Transient failures a webhook sender should retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.reason(),
            Some(CompletionReason::ProcessorUnavailable)
                | Some(CompletionReason::OrderBackendUnavailable)
        )
    }

    pub fn redirect_target(&self, targets: &RedirectTargets) -> String {
        match self {
            Self::OrderCreated {
                session_id,
                order_id,
            }
            | Self::AlreadyCompleted {
                session_id,
                order_id,
            } => targets.build(
                &targets.confirmation_path,
                &[
                    ("orderId", order_id),
                    ("session_id", session_id),
                    ("order_created", "true"),
                ],
            ),
            Self::OrderRejected { session_id, reason } => targets.build(
                &targets.confirmation_path,
                &[
                    ("session_id", session_id),
                    ("order_created", "false"),
                    ("reason", reason.code()),
                    ("error", reason.message()),
                ],
            ),
            Self::EnvelopeUnavailable { session_id, reason } => {
                targets.error_page(*reason, Some(session_id.as_str()))
            }
            Self::MissingSessionId => targets.error_page(CompletionReason::MissingSessionId, None),
            Self::SessionNotFound { .. } => {
                targets.error_page(CompletionReason::SessionNotFound, None)
            }
            Self::ProcessorUnavailable { .. } => {
                targets.error_page(CompletionReason::ProcessorUnavailable, None)
            }
            Self::PaymentNotCompleted { .. } => {
                targets.error_page(CompletionReason::PaymentFailed, None)
            }
        }
    }
}

/// Sessions already turned into orders by this instance, plus the completions
/// currently running for each session.
#[derive(Clone, Default)]
pub struct CompletedCheckouts {
    orders: Arc<DashMap<String, (String, Instant)>>,
    in_flight: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

/// Exclusive right to complete one session. Released on drop.
pub struct SessionClaim {
    guard: Option<OwnedMutexGuard<()>>,
    session_id: String,
    in_flight: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl Drop for SessionClaim {
    fn drop(&mut self) {
        self.guard.take();
        // Only the map's own handle left means nobody is waiting.
        self.in_flight
            .remove_if(&self.session_id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

impl CompletedCheckouts {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits until no other completion of `session_id` is running in this instance.
    pub async fn claim(&self, session_id: &str) -> SessionClaim {
        let lock = self
            .in_flight
            .entry(session_id.to_string())
            .or_default()
            .clone();
        SessionClaim {
            guard: Some(lock.lock_owned().await),
            session_id: session_id.to_string(),
            in_flight: self.in_flight.clone(),
        }
    }

    pub fn get(&self, session_id: &str) -> Option<String> {
        self.orders
            .get(session_id)
            .filter(|entry| entry.1.elapsed() < COMPLETED_RETENTION)
            .map(|entry| entry.0.clone())
    }

    pub fn record(&self, session_id: &str, order_id: &str) {
        self.cleanup();
        self.orders
            .insert(session_id.to_string(), (order_id.to_string(), Instant::now()));
    }

    fn cleanup(&self) {
        let now = Instant::now();
        self.orders
            .retain(|_, entry| now.duration_since(entry.1) < COMPLETED_RETENTION);
    }
}

pub struct CheckoutCompletionService {
    processor: Arc<dyn PaymentProcessor>,
    order_backend: Arc<dyn OrderBackend>,
    correlation_store: Arc<dyn CorrelationStore>,
    defaults: OrderDefaults,
    completed: CompletedCheckouts,
    targets: RedirectTargets,
}

impl CheckoutCompletionService {
    pub fn new(
        config: &AppConfig,
        processor: Arc<dyn PaymentProcessor>,
        order_backend: Arc<dyn OrderBackend>,
        correlation_store: Arc<dyn CorrelationStore>,
    ) -> Self {
        Self {
            processor,
            order_backend,
            correlation_store,
            defaults: OrderDefaults::from_config(config),
            completed: CompletedCheckouts::new(),
            targets: RedirectTargets::from_config(config),
        }
    }

    pub fn redirect_targets(&self) -> &RedirectTargets {
        &self.targets
    }

    #[instrument(skip(self))]
    pub async fn complete(&self, session_reference: Option<&str>) -> CompletionOutcome {
        let Some(session_id) = session_reference
            .map(str::trim)
            .filter(|id| !id.is_empty())
        else {
            warn!("Checkout completion without a session reference");
            return CompletionOutcome::MissingSessionId;
        };
        let session_id = session_id.to_string();

        let _claim = self.completed.claim(&session_id).await;
        if let Some(order_id) = self.completed.get(&session_id) {
            info!(%session_id, %order_id, "Checkout already completed; not creating a second order");
            return CompletionOutcome::AlreadyCompleted {
                session_id,
                order_id,
            };
        }

        let session = match self.processor.retrieve_session(&session_id).await {
            Ok(session) => session,
            Err(ProcessorError::NotFound(_)) => {
                warn!(%session_id, "Checkout session not found");
                return CompletionOutcome::SessionNotFound { session_id };
            }
            Err(e) => {
                error!(%session_id, "Could not retrieve checkout session: {}", e);
                return CompletionOutcome::ProcessorUnavailable { session_id };
            }
        };

        if !session.payment_status.is_settled() {
            warn!(
                %session_id,
                payment_status = %session.payment_status,
                "Checkout session is not paid; no order created"
            );
            return CompletionOutcome::PaymentNotCompleted {
                session_id,
                payment_status: session.payment_status,
            };
        }

        let (envelope, from_store) = match self.recover_envelope(&session).await {
            Ok(recovered) => recovered,
            Err(reason) => {
                error!(
                    %session_id,
                    reason = reason.code(),
                    amount_total = ?session.amount_total,
                    "Payment captured but order data unavailable"
                );
                return CompletionOutcome::EnvelopeUnavailable { session_id, reason };
            }
        };

        let request = BackendOrderRequest::from_envelope(&envelope, &self.defaults);
        match self.order_backend.create_order(request, &session_id).await {
            Ok(created) => {
                self.completed.record(&session_id, &created.order_id);
                if from_store {
                    if let Err(e) = self.correlation_store.delete(&session_id).await {
                        warn!(%session_id, "Could not delete consumed correlation entry: {}", e);
                    }
                }
                info!(%session_id, order_id = %created.order_id, "Checkout completed");
                CompletionOutcome::OrderCreated {
                    session_id,
                    order_id: created.order_id,
                }
            }
            Err(e) => {
                let reason = CompletionReason::from(&e);
                error!(
                    %session_id,
                    reason = reason.code(),
                    amount_total = ?session.amount_total,
                    customer_email = ?session.customer_email,
                    "Payment captured but order creation failed: {}",
                    e
                );
                CompletionOutcome::OrderRejected { session_id, reason }
            }
        }
    }

    /// Metadata first; the correlation store only when metadata carries neither form.
    async fn recover_envelope(
        &self,
        session: &ProcessorSession,
    ) -> Result<(OrderEnvelope, bool), CompletionReason> {
        match envelope_codec::reassemble(&session.metadata) {
            Ok(encoded) => envelope_codec::decode(&encoded)
                .map(|envelope| (envelope, false))
                .map_err(|e| {
                    error!(session_id = %session.id, "{}", e);
                    CompletionReason::DecodeFailed
                }),
            Err(EnvelopeRecoveryError::NotFound) => {
                match self.correlation_store.get(&session.id).await {
                    Ok(Some(envelope)) => Ok((envelope, true)),
                    Ok(None) => Err(CompletionReason::OrderDataNotFound),
                    Err(e) => {
                        error!(session_id = %session.id, "Correlation store lookup failed: {}", e);
                        Err(CompletionReason::OrderDataNotFound)
                    }
                }
            }
            Err(EnvelopeRecoveryError::ChunksIncomplete(detail)) => {
                error!(session_id = %session.id, %detail, "Order data chunks incomplete");
                Err(CompletionReason::OrderDataIncomplete)
            }
            Err(EnvelopeRecoveryError::DecodeFailed(detail)) => {
                error!(session_id = %session.id, %detail, "Order data could not be decoded");
                Err(CompletionReason::DecodeFailed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn targets() -> RedirectTargets {
        RedirectTargets {
            public_base: "https://grodify.example".into(),
            confirmation_path: "/order-confirmation".into(),
            error_path: "/payment-error".into(),
        }
    }

    #[test]
    fn pre_payment_failures_go_to_the_error_page() {
        let outcome = CompletionOutcome::PaymentNotCompleted {
            session_id: "cs_1".into(),
            payment_status: PaymentStatus::Unpaid,
        };
        assert_eq!(
            outcome.redirect_target(&targets()),
            "https://grodify.example/payment-error?reason=payment_failed&error=Payment+was+not+completed"
        );
        assert!(!outcome.payment_captured());
    }

    #[test]
    fn missing_reference_redirect() {
        assert_eq!(
            CompletionOutcome::MissingSessionId.redirect_target(&targets()),
            "https://grodify.example/payment-error?reason=missing_session_id&error=Missing+checkout+session+reference"
        );
    }

    #[test]
    fn lost_order_data_goes_to_the_error_page_with_session() {
        let outcome = CompletionOutcome::EnvelopeUnavailable {
            session_id: "cs_1".into(),
            reason: CompletionReason::OrderDataNotFound,
        };
        let target = Url::parse(&outcome.redirect_target(&targets())).unwrap();
        assert_eq!(target.path(), "/payment-error");

        let params: Vec<(String, String)> = target.query_pairs().into_owned().collect();
        assert!(params.contains(&("session_id".into(), "cs_1".into())));
        assert!(params.contains(&("reason".into(), "order_data_not_found".into())));
        let error = &params.iter().find(|(k, _)| k == "error").unwrap().1;
        assert!(error.starts_with("Order data not found"));
        assert!(error.contains("payment was received"));
        assert!(!params.iter().any(|(k, _)| k == "orderId" || k == "order_created"));
        assert!(outcome.payment_captured());
    }

    #[test]
    fn partial_failure_is_flagged_without_order_id() {
        let outcome = CompletionOutcome::OrderRejected {
            session_id: "cs_1".into(),
            reason: CompletionReason::OrderBackendRejected,
        };
        let target = Url::parse(&outcome.redirect_target(&targets())).unwrap();
        assert_eq!(target.path(), "/order-confirmation");

        let params: Vec<(String, String)> = target.query_pairs().into_owned().collect();
        assert!(params.contains(&("order_created".into(), "false".into())));
        assert!(params.contains(&("session_id".into(), "cs_1".into())));
        assert!(params.iter().any(|(k, v)| k == "error" && !v.is_empty()));
        assert!(!params.iter().any(|(k, _)| k == "orderId"));
        assert!(outcome.payment_captured());
    }

    #[test]
    fn success_carries_order_and_session() {
        let outcome = CompletionOutcome::OrderCreated {
            session_id: "cs_1".into(),
            order_id: "ord 9".into(),
        };
        assert_eq!(
            outcome.redirect_target(&targets()),
            "https://grodify.example/order-confirmation?orderId=ord+9&session_id=cs_1&order_created=true"
        );
    }

    #[test]
    fn completed_ledger_remembers_order_ids() {
        let ledger = CompletedCheckouts::new();
        assert!(ledger.get("cs_1").is_none());
        ledger.record("cs_1", "ord_1");
        assert_eq!(ledger.get("cs_1").as_deref(), Some("ord_1"));
    }

    #[tokio::test]
    async fn claims_serialize_completions_of_one_session() {
        let ledger = CompletedCheckouts::new();
        let first = ledger.claim("cs_1").await;

        let blocked =
            tokio::time::timeout(Duration::from_millis(20), ledger.claim("cs_1")).await;
        assert!(blocked.is_err());
        let _other_session = ledger.claim("cs_2").await;

        drop(first);
        let again = tokio::time::timeout(Duration::from_millis(20), ledger.claim("cs_1")).await;
        assert!(again.is_ok());
    }

    #[tokio::test]
    async fn released_claims_leave_nothing_behind() {
        let ledger = CompletedCheckouts::new();
        drop(ledger.claim("cs_1").await);
        assert!(ledger.in_flight.is_empty());
    }

    #[test]
    fn only_transient_failures_are_retryable() {
        assert!(CompletionOutcome::ProcessorUnavailable {
            session_id: "cs".into()
        }
        .is_retryable());
        assert!(!CompletionOutcome::OrderRejected {
            session_id: "cs".into(),
            reason: CompletionReason::OrderBackendTimeout
        }
        .is_retryable());
    }
}
