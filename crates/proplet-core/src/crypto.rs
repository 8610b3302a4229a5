//! Cryptographic primitives for workload ingestion.
//!
//! Provides two things:
//!   1. SHA-256 integrity verification against an optional hex digest
//!   2. AES-256-GCM opening of workload envelopes
//!
//! Envelope layout on the wire:
//!
//!   nonce (12 bytes) || ciphertext (N bytes) || tag (16 bytes)
//!
//! This is what the control plane produces by prepending the nonce to the
//! output of a standard GCM seal. No associated data is used.
//!
//! The workload key derives ZeroizeOnDrop and is wiped from memory when dropped.
//! There is no unsafe code in this module.

use std::fmt;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use sha2::{Digest, Sha256};
use thiserror::Error;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

/// AES-GCM nonce length.
pub const NONCE_LEN: usize = 12;

/// AES-GCM authentication tag length.
pub const TAG_LEN: usize = 16;

/// AES-256 key length.
pub const KEY_LEN: usize = 32;

/// Smallest valid envelope: a nonce and a tag around an empty ciphertext.
pub const MIN_ENVELOPE_LEN: usize = NONCE_LEN + TAG_LEN;

/// Length of a hex-rendered SHA-256 digest.
pub const DIGEST_HEX_LEN: usize = 64;

// ── SHA-256 ───────────────────────────────────────────────────────────────────

/// Hash a byte slice, returning a 32-byte SHA-256 digest.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// SHA-256 of `data` rendered as lowercase hex.
pub fn sha256_hex(data: &[u8]) -> String {
    hex::encode(sha256(data))
}

/// True if `expected_hex` is a well-formed digest, i.e. exactly 64 hex
/// characters. Anything else means "no integrity check requested".
pub fn is_digest_hex(expected_hex: &str) -> bool {
    expected_hex.len() == DIGEST_HEX_LEN && expected_hex.bytes().all(|b| b.is_ascii_hexdigit())
}

/// Result of a successful integrity check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Integrity {
    /// The digest matched.
    Verified,
    /// No well-formed digest was supplied; nothing was checked.
    Skipped,
}

/// Verify `data` against an expected lowercase-hex SHA-256 digest.
///
/// Checksums are optional metadata: an empty or malformed `expected_hex`
/// skips verification and succeeds with [`Integrity::Skipped`]. A well-formed
/// digest is compared case-sensitively against the lowercase rendering of
/// the computed one.
pub fn verify(data: &[u8], expected_hex: &str) -> Result<Integrity, CryptoError> {
    if !is_digest_hex(expected_hex) {
        return Ok(Integrity::Skipped);
    }

    let computed = sha256_hex(data);
    if computed != expected_hex {
        return Err(CryptoError::ChecksumMismatch {
            expected: expected_hex.to_string(),
            computed,
        });
    }
    Ok(Integrity::Verified)
}

// ── Workload Key ──────────────────────────────────────────────────────────────

/// The 32-byte symmetric key shared out-of-band with the control plane.
///
/// Supplied by configuration at startup and immutable afterwards. Never
/// derived from network input. Debug output is redacted.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct WorkloadKey([u8; KEY_LEN]);

impl WorkloadKey {
    pub fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Parse a key from 64 hex characters (surrounding whitespace ignored).
    pub fn from_hex(text: &str) -> Result<Self, CryptoError> {
        let decoded = Zeroizing::new(hex::decode(text.trim()).map_err(|_| CryptoError::InvalidKey)?);
        if decoded.len() != KEY_LEN {
            return Err(CryptoError::InvalidKey);
        }
        let mut bytes = [0u8; KEY_LEN];
        bytes.copy_from_slice(&decoded);
        Ok(Self(bytes))
    }

    /// Generate a random key. Used by provisioning tooling and tests.
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    fn cipher(&self) -> Aes256Gcm {
        Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&self.0))
    }
}

impl fmt::Debug for WorkloadKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("WorkloadKey(..)")
    }
}

// ── Envelopes ─────────────────────────────────────────────────────────────────

/// Open an envelope, returning the plaintext.
///
/// All-or-nothing: either the tag authenticates and the full plaintext
/// (exactly `envelope.len() - 28` bytes) is returned, or no plaintext is.
/// Envelopes shorter than 28 bytes are rejected before any cipher state
/// is built.
pub fn decrypt(envelope: &[u8], key: &WorkloadKey) -> Result<Vec<u8>, CryptoError> {
    if envelope.len() < MIN_ENVELOPE_LEN {
        return Err(CryptoError::TooShort { len: envelope.len() });
    }

    // aes-gcm expects the tag appended to the ciphertext, which is exactly
    // the envelope with its nonce prefix removed.
    let (nonce, sealed) = envelope.split_at(NONCE_LEN);
    key.cipher()
        .decrypt(Nonce::from_slice(nonce), Payload { msg: sealed, aad: &[] })
        .map_err(|_| CryptoError::Decryption)
}

/// Seal `plaintext` into an envelope under a fresh random nonce.
///
/// The device never encrypts workloads itself; this exists so that
/// provisioning tools and tests produce byte-identical envelopes to the
/// control plane.
pub fn seal(plaintext: &[u8], key: &WorkloadKey) -> Result<Vec<u8>, CryptoError> {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    seal_with_nonce(plaintext, key, &nonce)
}

/// Seal `plaintext` under an explicit nonce. The caller guarantees nonce
/// uniqueness per key.
pub fn seal_with_nonce(
    plaintext: &[u8],
    key: &WorkloadKey,
    nonce: &[u8; NONCE_LEN],
) -> Result<Vec<u8>, CryptoError> {
    let sealed = key
        .cipher()
        .encrypt(Nonce::from_slice(nonce), Payload { msg: plaintext, aad: &[] })
        .map_err(|_| CryptoError::Encryption)?;

    let mut envelope = Vec::with_capacity(NONCE_LEN + sealed.len());
    envelope.extend_from_slice(nonce);
    envelope.extend_from_slice(&sealed);
    Ok(envelope)
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum CryptoError {
    #[error("checksum mismatch: expected {expected}, computed {computed}")]
    ChecksumMismatch { expected: String, computed: String },

    #[error("envelope too short: {len} bytes (need at least 28: 12 nonce + 16 tag)")]
    TooShort { len: usize },

    #[error("authentication failed: wrong key or corrupted envelope")]
    Decryption,

    #[error("envelope encryption failed")]
    Encryption,

    #[error("workload key must be 64 hex characters (32 bytes)")]
    InvalidKey,
}

// ── Tests ─────────────────────────────────────────────────────────────────────
