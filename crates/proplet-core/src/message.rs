//! Control-plane message schema.
//!
//! Inbound payloads are decoded into typed commands before any handler
//! logic runs. Anything that fails to parse, or lacks a required field, is
//! rejected here and never reaches the task registry or the reassembler.
//!
//! Outbound payloads are plain serde structs. Field order is significant
//! only for readability on the wire; the manager parses them as JSON.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::topic::Topic;

// ── Inbound ───────────────────────────────────────────────────────────────────

/// `control/manager/start`
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StartCommand {
    pub id: String,
    pub name: String,
    /// Registry reference, used when no inline binary is sent.
    #[serde(default)]
    pub image_url: Option<String>,
    /// Base64 of an encrypted envelope.
    #[serde(default)]
    pub file: Option<String>,
    /// Lowercase hex SHA-256 of the decoded envelope.
    #[serde(default)]
    pub checksum: Option<String>,
    #[serde(default)]
    pub inputs: Option<Vec<f64>>,
}

impl StartCommand {
    pub fn decode(payload: &[u8]) -> Result<Self, MessageError> {
        let cmd: Self = serde_json::from_slice(payload)?;
        require_non_empty("id", &cmd.id)?;
        Ok(cmd)
    }

    /// The inline binary, if one was sent. An empty string counts as absent.
    pub fn inline_file(&self) -> Option<&str> {
        self.file.as_deref().filter(|f| !f.is_empty())
    }

    /// The registry reference, if one was sent. An empty string counts as absent.
    pub fn image_url(&self) -> Option<&str> {
        self.image_url.as_deref().filter(|u| !u.is_empty())
    }

    /// Expected digest, or `""` when none was sent.
    pub fn checksum(&self) -> &str {
        self.checksum.as_deref().unwrap_or("")
    }

    /// Inputs as the runtime consumes them, capped at `max` entries.
    ///
    /// Returns the inputs and whether any were dropped. Values are converted
    /// with saturating float-to-integer semantics (negative → 0).
    pub fn bounded_inputs(&self, max: usize) -> (Vec<u64>, bool) {
        let raw = self.inputs.as_deref().unwrap_or(&[]);
        let inputs = raw.iter().take(max).map(|&v| v as u64).collect();
        (inputs, raw.len() > max)
    }
}

/// `control/manager/stop`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StopCommand {
    pub id: String,
}

impl StopCommand {
    pub fn decode(payload: &[u8]) -> Result<Self, MessageError> {
        Ok(serde_json::from_slice(payload)?)
    }
}

/// `registry/server`, one message per chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryChunk {
    pub chunk_idx: u32,
    pub total_chunks: u32,
    /// Base64 of this chunk's slice of the envelope.
    pub data: String,
    /// Digest of the whole envelope. Only meaningful on chunk 0.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
}

impl RegistryChunk {
    pub fn decode(payload: &[u8]) -> Result<Self, MessageError> {
        Ok(serde_json::from_slice(payload)?)
    }

    pub fn is_last(&self) -> bool {
        self.chunk_idx.checked_add(1) == Some(self.total_chunks)
    }
}

/// A decoded inbound message.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Start(StartCommand),
    Stop(StopCommand),
    RegistryChunk(RegistryChunk),
}

impl Command {
    /// Decode `payload` according to the inbound topic it arrived on.
    pub fn decode(topic: Topic, payload: &[u8]) -> Result<Self, MessageError> {
        match topic {
            Topic::Start => StartCommand::decode(payload).map(Command::Start),
            Topic::Stop => StopCommand::decode(payload).map(Command::Stop),
            Topic::RegistryResponse => RegistryChunk::decode(payload).map(Command::RegistryChunk),
            other => Err(MessageError::NotInbound(other)),
        }
    }
}

fn require_non_empty(field: &'static str, value: &str) -> Result<(), MessageError> {
    if value.is_empty() {
        return Err(MessageError::EmptyField(field));
    }
    Ok(())
}

// ── Outbound ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Liveness {
    Alive,
    Offline,
}

/// `control/proplet/alive`, used for the heartbeat and the last will.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AliveMessage {
    pub status: Liveness,
    pub proplet_id: String,
    pub namespace: String,
}

/// `control/proplet/create`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryMessage {
    pub proplet_id: String,
}

/// `registry/proplet`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryFetchRequest {
    pub app_name: String,
}

/// `control/proplet/results`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultsMessage {
    pub task_id: String,
    pub results: Vec<i64>,
    /// Set when the runtime failed after the workload was launched.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    Downloaded,
}

/// `control/manager/registry`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryAck {
    pub id: String,
    pub status: AckStatus,
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum MessageError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("required field `{0}` is empty")]
    EmptyField(&'static str),

    #[error("`{0}` is not an inbound topic")]
    NotInbound(Topic),
}
