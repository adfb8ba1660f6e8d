pub mod order_envelope;

pub use order_envelope::{HostField, NamedEntry, OrderEnvelope, OrderFormData};
