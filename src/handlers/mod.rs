pub mod checkout;
pub mod common;
pub mod health;
pub mod payment_webhooks;
pub mod temp_order_storage;

use std::sync::Arc;

use crate::cache::CorrelationStore;
use crate::config::AppConfig;
use crate::services::commerce::{CheckoutCompletionService, CheckoutSessionService, OrderBackend};
use crate::services::payment_processor::PaymentProcessor;
use crate::webhooks::WebhookVerifier;

// Re-export AppState so handler modules can import it as crate::handlers::AppState
pub use crate::AppState;

/// Services layer that encapsulates business logic used by HTTP handlers
#[derive(Clone)]
pub struct AppServices {
    pub checkout_sessions: Arc<CheckoutSessionService>,
    pub checkout_completion: Arc<CheckoutCompletionService>,
    pub correlation_store: Arc<dyn CorrelationStore>,
    /// Present only when a webhook secret is configured.
    pub webhook_verifier: Option<Arc<WebhookVerifier>>,
}

impl AppServices {
    pub fn new(
        config: &AppConfig,
        processor: Arc<dyn PaymentProcessor>,
        order_backend: Arc<dyn OrderBackend>,
        correlation_store: Arc<dyn CorrelationStore>,
    ) -> Self {
        let checkout_sessions = Arc::new(CheckoutSessionService::new(
            config,
            processor.clone(),
            correlation_store.clone(),
        ));
        let checkout_completion = Arc::new(CheckoutCompletionService::new(
            config,
            processor,
            order_backend,
            correlation_store.clone(),
        ));
        let webhook_verifier = config
            .stripe_webhook_secret
            .as_deref()
            .filter(|secret| !secret.trim().is_empty())
            .map(|secret| {
                Arc::new(WebhookVerifier::new(
                    secret,
                    config.stripe_webhook_tolerance_secs,
                ))
            });

        Self {
            checkout_sessions,
            checkout_completion,
            correlation_store,
            webhook_verifier,
        }
    }
}
