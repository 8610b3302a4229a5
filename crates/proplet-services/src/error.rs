//! Ingestion error kinds.
//!
//! Every handler failure collapses into one of these. None of them are
//! fatal: the router logs the error, the in-flight operation is abandoned,
//! and the control plane sees only the absence of an ack or result.

use proplet_core::{CryptoError, MessageError};
use thiserror::Error;

use crate::engine::EngineError;
use crate::reassembly::ReassemblyError;
use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("malformed message: {0}")]
    MalformedMessage(String),

    #[error("sequence error: {0}")]
    SequenceError(ReassemblyError),

    #[error("resource exhaustion: {0}")]
    ResourceExhaustion(String),

    #[error("checksum mismatch: expected {expected}, computed {computed}")]
    ChecksumMismatch { expected: String, computed: String },

    #[error("decryption failure: {0}")]
    DecryptionFailure(CryptoError),

    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("execution engine: {0}")]
    Engine(#[from] EngineError),
}

impl IngestError {
    /// Short, stable label for log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::MalformedMessage(_) => "malformed_message",
            IngestError::SequenceError(_) => "sequence_error",
            IngestError::ResourceExhaustion(_) => "resource_exhaustion",
            IngestError::ChecksumMismatch { .. } => "checksum_mismatch",
            IngestError::DecryptionFailure(_) => "decryption_failure",
            IngestError::Transport(TransportError::NotConnected) => "not_connected",
            IngestError::Transport(_) => "transport_error",
            IngestError::Engine(_) => "engine_error",
        }
    }

    /// The payload was well-formed but failed verification or decryption.
    pub fn is_integrity_failure(&self) -> bool {
        matches!(
            self,
            IngestError::ChecksumMismatch { .. } | IngestError::DecryptionFailure(_)
        )
    }
}

impl From<MessageError> for IngestError {
    fn from(e: MessageError) -> Self {
        IngestError::MalformedMessage(e.to_string())
    }
}

impl From<ReassemblyError> for IngestError {
    fn from(e: ReassemblyError) -> Self {
        if e.is_resource_exhaustion() {
            IngestError::ResourceExhaustion(e.to_string())
        } else {
            IngestError::SequenceError(e)
        }
    }
}

impl From<CryptoError> for IngestError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::ChecksumMismatch { expected, computed } => {
                IngestError::ChecksumMismatch { expected, computed }
            }
            other => IngestError::DecryptionFailure(other),
        }
    }
}
