/// Checkout-to-order pipeline: session creation, payload transport, completion
pub mod backend_order;
pub mod checkout_completion;
pub mod checkout_sessions;
pub mod envelope_codec;
pub mod order_backend_client;

// Re-export services for convenience
pub use backend_order::{BackendOrderRequest, OrderDefaults};
pub use checkout_completion::{
    CheckoutCompletionService, CompletedCheckouts, CompletionOutcome, CompletionReason,
    RedirectTargets,
};
pub use checkout_sessions::{
    CheckoutSessionCreated, CheckoutSessionService, CreateCheckoutSessionInput, OrderDataStorage,
};
pub use order_backend_client::{CreatedOrder, OrderBackend, OrderBackendClient, OrderBackendError};
