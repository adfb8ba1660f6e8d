/// Inbound payment-processor webhook authentication
pub mod stripe_signature;

pub use stripe_signature::{SignatureError, WebhookVerifier, SIGNATURE_HEADER};
