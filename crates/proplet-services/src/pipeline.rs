//! Envelope handling shared by the inline and chunked start paths:
//! bounded base64 decoding, then verify, then decrypt.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use proplet_core::crypto::{self, Integrity};
use proplet_core::WorkloadKey;

use crate::error::IngestError;

/// Decode an inline base64 envelope, refusing anything over `max` bytes
/// before allocating for it.
pub fn decode_inline(encoded: &str, max: usize) -> Result<Vec<u8>, IngestError> {
    let estimate = base64::decoded_len_estimate(encoded.len());
    if estimate.saturating_sub(2) > max {
        return Err(IngestError::ResourceExhaustion(format!(
            "inline workload of ~{estimate} bytes exceeds the {max}-byte ceiling"
        )));
    }
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| IngestError::MalformedMessage(format!("inline file is not valid base64: {e}")))?;
    if bytes.len() > max {
        return Err(IngestError::ResourceExhaustion(format!(
            "inline workload of {} bytes exceeds the {max}-byte ceiling",
            bytes.len()
        )));
    }
    Ok(bytes)
}

/// Verify `envelope` against `expected_digest`, then decrypt it.
/// Nothing is returned unless both steps pass.
pub fn open_envelope(
    envelope: &[u8],
    expected_digest: &str,
    key: &WorkloadKey,
) -> Result<Vec<u8>, IngestError> {
    match crypto::verify(envelope, expected_digest)? {
        Integrity::Verified => {
            tracing::debug!(checksum = %expected_digest, "envelope checksum verified")
        }
        Integrity::Skipped => {
            tracing::warn!(len = envelope.len(), "no usable checksum; integrity check skipped")
        }
    }
    let plaintext = crypto::decrypt(envelope, key)?;
    tracing::info!(
        envelope_len = envelope.len(),
        plaintext_len = plaintext.len(),
        "workload decrypted"
    );
    Ok(plaintext)
}
