//! Order payload transport encoding.
//!
//! An [`OrderEnvelope`] is serialized to JSON, base64-encoded, and either stored
//! in a single metadata field or split into fixed-size numbered chunks with a
//! `chunkCount` marker. Reassembly reverses that exactly.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use thiserror::Error;

use crate::errors::ServiceError;
use crate::models::OrderEnvelope;
use crate::services::payment_processor::{SessionMetadata, METADATA_VALUE_LIMIT};

/// Chunk length; equal to the processor's per-value ceiling.
pub const CHUNK_SIZE: usize = METADATA_VALUE_LIMIT;

pub const INLINE_KEY: &str = "orderData";
pub const CHUNK_COUNT_KEY: &str = "chunkCount";

pub fn chunk_key(index: usize) -> String {
    format!("{}_{}", INLINE_KEY, index)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EncodedEnvelope {
    Inline(String),
    Chunked(Vec<String>),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EnvelopeRecoveryError {
    #[error("Order data not found in session metadata")]
    NotFound,

    #[error("Order data chunks incomplete: {0}")]
    ChunksIncomplete(String),

    #[error("Order data could not be decoded: {0}")]
    DecodeFailed(String),
}

impl EncodedEnvelope {
    /// Splits an already-encoded envelope string. Lengths are in characters.
    pub fn from_encoded(encoded: String) -> Self {
        if encoded.chars().count() <= CHUNK_SIZE {
            return EncodedEnvelope::Inline(encoded);
        }
        let chars: Vec<char> = encoded.chars().collect();
        EncodedEnvelope::Chunked(
            chars
                .chunks(CHUNK_SIZE)
                .map(|chunk| chunk.iter().collect())
                .collect(),
        )
    }

    /// Number of metadata values the payload occupies (1 when inline).
    pub fn chunk_count(&self) -> usize {
        match self {
            EncodedEnvelope::Inline(_) => 1,
            EncodedEnvelope::Chunked(chunks) => chunks.len(),
        }
    }

    /// Metadata keys this payload will add, including `chunkCount`.
    pub fn metadata_keys_needed(&self) -> usize {
        match self {
            EncodedEnvelope::Inline(_) => 1,
            EncodedEnvelope::Chunked(chunks) => chunks.len() + 1,
        }
    }

    pub fn write_metadata(&self, metadata: &mut SessionMetadata) {
        match self {
            EncodedEnvelope::Inline(value) => {
                metadata.insert(INLINE_KEY.to_string(), value.clone());
            }
            EncodedEnvelope::Chunked(chunks) => {
                for (index, chunk) in chunks.iter().enumerate() {
                    metadata.insert(chunk_key(index), chunk.clone());
                }
                metadata.insert(CHUNK_COUNT_KEY.to_string(), chunks.len().to_string());
            }
        }
    }
}

/// Serializes and encodes an envelope. Deterministic for a given envelope.
pub fn encode(envelope: &OrderEnvelope) -> Result<EncodedEnvelope, ServiceError> {
    let json = serde_json::to_vec(envelope)?;
    Ok(EncodedEnvelope::from_encoded(STANDARD.encode(json)))
}

/// Recovers the encoded envelope string from session metadata.
///
/// `chunkCount` wins over an inline value when both are present.
pub fn reassemble(metadata: &SessionMetadata) -> Result<String, EnvelopeRecoveryError> {
    if let Some(raw_count) = metadata.get(CHUNK_COUNT_KEY) {
        let count: usize = raw_count.trim().parse().map_err(|_| {
            EnvelopeRecoveryError::ChunksIncomplete(format!("invalid chunkCount '{}'", raw_count))
        })?;
        if count == 0 {
            return Err(EnvelopeRecoveryError::ChunksIncomplete(
                "chunkCount is zero".to_string(),
            ));
        }

        let mut encoded = String::with_capacity(count * CHUNK_SIZE);
        for index in 0..count {
            let chunk = metadata.get(&chunk_key(index)).ok_or_else(|| {
                EnvelopeRecoveryError::ChunksIncomplete(format!(
                    "chunk {} of {} missing",
                    index, count
                ))
            })?;
            encoded.push_str(chunk);
        }
        return Ok(encoded);
    }

    metadata
        .get(INLINE_KEY)
        .cloned()
        .ok_or(EnvelopeRecoveryError::NotFound)
}

pub fn decode(encoded: &str) -> Result<OrderEnvelope, EnvelopeRecoveryError> {
    let json = STANDARD
        .decode(encoded.trim())
        .map_err(|e| EnvelopeRecoveryError::DecodeFailed(format!("base64: {}", e)))?;
    serde_json::from_slice(&json)
        .map_err(|e| EnvelopeRecoveryError::DecodeFailed(format!("json: {}", e)))
}
