// Payment processor seam and its Stripe implementation
pub mod payment_processor;
pub mod stripe_client;

// Checkout and order reconciliation
pub mod commerce;
