//! Chunk reassembly: turns the registry's chunk stream into one envelope.
//!
//! One transfer at a time. Chunk 0 opens it (and silently replaces any
//! unfinished one), every later chunk must carry exactly the next index, and
//! the decoded bytes may never exceed the configured capacity. Any violation
//! aborts the transfer: the buffer is dropped and the reassembler is back to
//! idle, so the only way forward is a fresh chunk 0.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use proplet_core::RegistryChunk;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Worst-case overshoot of `base64::decoded_len_estimate` over the real
/// decoded length.
const ESTIMATE_SLACK: usize = 2;

pub struct ChunkReassembler {
    capacity: usize,
    state: State,
}

enum State {
    Idle,
    Assembling(Assembly),
}

struct Assembly {
    buffer: Vec<u8>,
    expected_index: u32,
    total_chunks: u32,
    expected_digest: String,
    last_chunk_at: Instant,
}

/// Result of accepting one chunk.
#[derive(Debug)]
pub enum Progress {
    Pending { received: u32, total: u32 },
    Complete(AssembledEnvelope),
}

/// A fully reassembled, not yet verified, envelope.
pub struct AssembledEnvelope {
    pub bytes: Vec<u8>,
    /// Captured from chunk 0. May be empty or malformed.
    pub expected_digest: String,
    pub chunks: u32,
}

impl std::fmt::Debug for AssembledEnvelope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AssembledEnvelope")
            .field("len", &self.bytes.len())
            .field("expected_digest", &self.expected_digest)
            .field("chunks", &self.chunks)
            .finish()
    }
}

impl ChunkReassembler {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            state: State::Idle,
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self.state, State::Idle)
    }

    /// Decoded bytes held by the in-flight transfer.
    pub fn cursor(&self) -> Option<usize> {
        match &self.state {
            State::Assembling(a) => Some(a.buffer.len()),
            State::Idle => None,
        }
    }

    /// Index the in-flight transfer needs next.
    pub fn expected_index(&self) -> Option<u32> {
        match &self.state {
            State::Assembling(a) => Some(a.expected_index),
            State::Idle => None,
        }
    }

    /// Drop any in-flight transfer.
    pub fn reset(&mut self) {
        if let State::Assembling(a) = &self.state {
            tracing::info!(
                received = a.expected_index,
                total = a.total_chunks,
                "discarding in-flight transfer"
            );
        }
        self.state = State::Idle;
    }

    /// Feed one chunk. On error the in-flight transfer is gone.
    pub fn accept(&mut self, chunk: &RegistryChunk, now: Instant) -> Result<Progress, ReassemblyError> {
        let index = chunk.chunk_idx;
        let current = std::mem::replace(&mut self.state, State::Idle);

        let mut assembly = if index == 0 {
            if let State::Assembling(old) = &current {
                tracing::warn!(
                    received = old.expected_index,
                    total = old.total_chunks,
                    "new transfer replaces unfinished one"
                );
            }
            drop(current);
            self.begin(chunk, now)?
        } else {
            match current {
                State::Assembling(a) => a,
                State::Idle => return Err(ReassemblyError::NoTransfer { index }),
            }
        };

        if index != assembly.expected_index {
            return Err(ReassemblyError::OutOfOrder {
                expected: assembly.expected_index,
                got: index,
            });
        }
        if chunk.total_chunks != assembly.total_chunks {
            return Err(ReassemblyError::TotalMismatch {
                expected: assembly.total_chunks,
                got: chunk.total_chunks,
            });
        }

        decode_into(&mut assembly.buffer, &chunk.data, self.capacity, index)?;
        assembly.expected_index += 1;
        assembly.last_chunk_at = now;

        tracing::debug!(
            chunk_idx = index,
            total = assembly.total_chunks,
            cursor = assembly.buffer.len(),
            "chunk accepted"
        );

        if chunk.is_last() {
            return Ok(Progress::Complete(AssembledEnvelope {
                bytes: assembly.buffer,
                expected_digest: assembly.expected_digest,
                chunks: assembly.total_chunks,
            }));
        }

        let progress = Progress::Pending {
            received: assembly.expected_index,
            total: assembly.total_chunks,
        };
        self.state = State::Assembling(assembly);
        Ok(progress)
    }

    /// Discard the in-flight transfer if no chunk arrived within `timeout`.
    /// `None` never expires. Returns true if a transfer was discarded.
    pub fn expire_stalled(&mut self, now: Instant, timeout: Option<Duration>) -> bool {
        let Some(timeout) = timeout else {
            return false;
        };
        let stalled = match &self.state {
            State::Assembling(a) => now.saturating_duration_since(a.last_chunk_at) > timeout,
            State::Idle => false,
        };
        if stalled {
            if let State::Assembling(a) = &self.state {
                tracing::warn!(
                    received = a.expected_index,
                    total = a.total_chunks,
                    timeout_secs = timeout.as_secs(),
                    "discarding stalled transfer"
                );
            }
            self.state = State::Idle;
        }
        stalled
    }

    fn begin(&self, chunk: &RegistryChunk, now: Instant) -> Result<Assembly, ReassemblyError> {
        if chunk.total_chunks == 0 {
            return Err(ReassemblyError::EmptyTransfer);
        }
        let reserve = self.capacity.saturating_add(ESTIMATE_SLACK);
        let mut buffer = Vec::new();
        buffer
            .try_reserve_exact(reserve)
            .map_err(|_| ReassemblyError::Allocation { bytes: reserve })?;

        let expected_digest = chunk.checksum.clone().unwrap_or_default();
        tracing::info!(
            total = chunk.total_chunks,
            capacity = self.capacity,
            checksum = %expected_digest,
            "transfer started"
        );
        Ok(Assembly {
            buffer,
            expected_index: 0,
            total_chunks: chunk.total_chunks,
            expected_digest,
            last_chunk_at: now,
        })
    }
}

/// Decode `data` onto the end of `buffer` without growing it past the
/// reservation made in `begin`.
fn decode_into(
    buffer: &mut Vec<u8>,
    data: &str,
    capacity: usize,
    index: u32,
) -> Result<(), ReassemblyError> {
    let cursor = buffer.len();
    let remaining = capacity.saturating_sub(cursor);
    let estimate = base64::decoded_len_estimate(data.len());
    if estimate.saturating_sub(ESTIMATE_SLACK) > remaining {
        return Err(ReassemblyError::Overflow { index, capacity });
    }

    buffer.resize(cursor + estimate, 0);
    match STANDARD.decode_slice(data.as_bytes(), &mut buffer[cursor..]) {
        Ok(written) => buffer.truncate(cursor + written),
        Err(source) => return Err(ReassemblyError::Decode { index, source }),
    }
    if buffer.len() > capacity {
        return Err(ReassemblyError::Overflow { index, capacity });
    }
    Ok(())
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ReassemblyError {
    #[error("chunk {got} out of order (expected {expected})")]
    OutOfOrder { expected: u32, got: u32 },

    #[error("chunk {index} arrived with no transfer in progress")]
    NoTransfer { index: u32 },

    #[error("chunk declares {got} total chunks, transfer started with {expected}")]
    TotalMismatch { expected: u32, got: u32 },

    #[error("transfer declares zero chunks")]
    EmptyTransfer,

    #[error("chunk {index} is not valid base64: {source}")]
    Decode {
        index: u32,
        source: base64::DecodeSliceError,
    },

    #[error("chunk {index} would exceed the {capacity}-byte workload ceiling")]
    Overflow { index: u32, capacity: usize },

    #[error("could not allocate {bytes}-byte reassembly buffer")]
    Allocation { bytes: usize },
}

impl ReassemblyError {
    /// Size-ceiling and allocation failures, as opposed to sequencing faults.
    pub fn is_resource_exhaustion(&self) -> bool {
        matches!(
            self,
            ReassemblyError::Overflow { .. } | ReassemblyError::Allocation { .. }
        )
    }
}
