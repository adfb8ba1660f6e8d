//! Property-based tests for order payload transport.
//!
//! These check that any envelope survives encoding, chunking and reassembly
//! unchanged, and that the backend projection always carries both total fields.

use grodify_checkout::models::{HostField, NamedEntry, OrderEnvelope, OrderFormData};
use grodify_checkout::services::commerce::envelope_codec::{
    self, EncodedEnvelope, CHUNK_SIZE,
};
use grodify_checkout::services::commerce::{BackendOrderRequest, OrderDefaults};
use grodify_checkout::services::payment_processor::SessionMetadata;
use proptest::prelude::*;

fn text_strategy() -> impl Strategy<Value = Option<String>> {
    proptest::option::of("[A-Za-z0-9 '&éü-]{1,40}")
}

fn entries_strategy(max: usize) -> impl Strategy<Value = Option<Vec<NamedEntry>>> {
    proptest::option::of(prop::collection::vec(
        "[A-Za-z ]{1,30}".prop_map(NamedEntry::named),
        0..max,
    ))
}

fn price_strategy() -> impl Strategy<Value = f64> {
    (0u32..100_000).prop_map(|cents| f64::from(cents) / 100.0)
}

fn envelope_strategy() -> impl Strategy<Value = OrderEnvelope> {
    (
        (text_strategy(), text_strategy(), text_strategy()),
        proptest::option::of("[0-9]{1,3}"),
        proptest::option::of(any::<bool>()),
        price_strategy(),
        proptest::option::of(price_strategy()),
        entries_strategy(80),
        proptest::option::of("[A-Za-z ]{1,20}".prop_map(|n| HostField::One(NamedEntry::named(n)))),
        entries_strategy(10),
        "[a-z0-9-]{1,24}",
        "[a-z]{3,10}@[a-z]{3,8}\\.com",
    )
        .prop_map(
            |(
                (presenting, event_title, note),
                category_id,
                custom_flyer,
                total_price,
                subtotal,
                djs,
                host,
                sponsors,
                user_id,
                user_email,
            )| {
                OrderEnvelope::new(
                    OrderFormData {
                        presenting,
                        event_title,
                        note,
                        category_id,
                        custom_flyer,
                        total_price,
                        subtotal,
                        djs,
                        host,
                        sponsors,
                        ..Default::default()
                    },
                    user_id,
                    user_email,
                )
            },
        )
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    #[test]
    fn envelopes_survive_metadata_transport(envelope in envelope_strategy()) {
        let encoded = envelope_codec::encode(&envelope).unwrap();
        let mut metadata = SessionMetadata::new();
        encoded.write_metadata(&mut metadata);

        let recovered = envelope_codec::decode(&envelope_codec::reassemble(&metadata).unwrap()).unwrap();
        prop_assert_eq!(recovered, envelope);
    }

    #[test]
    fn encoding_is_deterministic(envelope in envelope_strategy()) {
        prop_assert_eq!(
            envelope_codec::encode(&envelope).unwrap(),
            envelope_codec::encode(&envelope).unwrap()
        );
    }

    #[test]
    fn every_value_fits_the_metadata_limit(envelope in envelope_strategy()) {
        let mut metadata = SessionMetadata::new();
        envelope_codec::encode(&envelope).unwrap().write_metadata(&mut metadata);
        prop_assert!(metadata.values().all(|v| v.chars().count() <= CHUNK_SIZE));
    }

    #[test]
    fn backend_form_always_carries_both_totals(envelope in envelope_strategy()) {
        let request = BackendOrderRequest::from_envelope(&envelope, &OrderDefaults::default());
        prop_assert!(request.field("total_price").is_some());
        prop_assert!(request.field(" total_price").is_some());
        prop_assert_eq!(
            request.field("total_price").unwrap().parse::<f64>().unwrap(),
            envelope.form_data.total_price
        );
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn chunking_splits_into_full_chunks_then_a_remainder(encoded in "[A-Za-z0-9+/]{0,3000}") {
        let len = encoded.len();
        match EncodedEnvelope::from_encoded(encoded.clone()) {
            EncodedEnvelope::Inline(value) => {
                prop_assert!(len <= CHUNK_SIZE);
                prop_assert_eq!(value, encoded);
            }
            EncodedEnvelope::Chunked(chunks) => {
                prop_assert!(len > CHUNK_SIZE);
                prop_assert_eq!(chunks.len(), (len + CHUNK_SIZE - 1) / CHUNK_SIZE);
                let (last, full) = chunks.split_last().unwrap();
                prop_assert!(full.iter().all(|c| c.len() == CHUNK_SIZE));
                prop_assert!(!last.is_empty() && last.len() <= CHUNK_SIZE);
                prop_assert_eq!(chunks.concat(), encoded);
            }
        }
    }

    #[test]
    fn reassembly_fails_when_any_chunk_is_missing(
        encoded in "[A-Za-z0-9+/]{501,2500}",
        drop_seed in any::<usize>(),
    ) {
        let chunked = EncodedEnvelope::from_encoded(encoded);
        let mut metadata = SessionMetadata::new();
        chunked.write_metadata(&mut metadata);
        let dropped = envelope_codec::chunk_key(drop_seed % chunked.chunk_count());
        metadata.remove(&dropped);

        prop_assert!(matches!(
            envelope_codec::reassemble(&metadata),
            Err(envelope_codec::EnvelopeRecoveryError::ChunksIncomplete(_))
        ));
    }
}
