//! Proplet integration test harness.
//!
//! Drives a real `Agent` end-to-end through its routing entry point, with the
//! transport and execution engine replaced by recording fakes. No broker or
//! runtime is needed:
//!
//!   cargo test --test integration
//!
//! Each test builds its own agent; nothing is shared between tests.

use std::cell::RefCell;
use std::rc::Rc;

use anyhow::{Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use proplet_core::crypto;
use proplet_core::{Channel, PropletConfig, Topic, WorkloadKey};
use proplet_services::{
    Agent, EngineError, ExecutionEngine, Transport, TransportError, Workload,
};

mod chunked;
mod ingest;

// ── Harness ───────────────────────────────────────────────────────────────────

pub const DOMAIN: &str = "dom-1";
pub const CHANNEL: &str = "chan-1";
pub const PROPLET_ID: &str = "proplet-it";

/// Key shared with the "control plane" in these tests.
pub const KEY_HEX: &str = "dd7284e5c1f02b8a3e9d4c6b7a8f1e2d3c4b5a69788796a5b4c3d2e1f0a95f53";

pub fn key() -> WorkloadKey {
    WorkloadKey::from_hex(KEY_HEX).unwrap()
}

pub fn channel() -> Channel {
    Channel::new(DOMAIN, CHANNEL)
}

pub fn topic(t: Topic) -> String {
    channel().topic(t)
}

/// Publishes recorded in order, plus a switch for the link state.
#[derive(Clone)]
pub struct RecordingTransport {
    inner: Rc<RefCell<TransportLog>>,
}

struct TransportLog {
    connected: bool,
    sent: Vec<(String, serde_json::Value)>,
}

impl RecordingTransport {
    pub fn new() -> Self {
        Self {
            inner: Rc::new(RefCell::new(TransportLog {
                connected: true,
                sent: Vec::new(),
            })),
        }
    }

    pub fn set_connected(&self, up: bool) {
        self.inner.borrow_mut().connected = up;
    }

    /// Every payload published on `t`, in order.
    pub fn on(&self, t: Topic) -> Vec<serde_json::Value> {
        let wanted = topic(t);
        self.inner
            .borrow()
            .sent
            .iter()
            .filter(|(topic, _)| *topic == wanted)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.inner.borrow().sent.len()
    }
}

impl Transport for RecordingTransport {
    fn is_connected(&self) -> bool {
        self.inner.borrow().connected
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        let value = serde_json::from_slice(&payload)?;
        self.inner.borrow_mut().sent.push((topic.to_string(), value));
        Ok(())
    }
}

/// Workloads started and stop requests received, in order.
#[derive(Clone, Default)]
pub struct RecordingEngine {
    inner: Rc<RefCell<EngineLog>>,
}

#[derive(Default)]
struct EngineLog {
    started: Vec<Workload>,
    stopped: Vec<String>,
    running: Vec<String>,
    refuse_next: bool,
}

impl RecordingEngine {
    pub fn started(&self) -> Vec<Workload> {
        self.inner.borrow().started.clone()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.inner.borrow().stopped.clone()
    }

    /// The next `start` fails to launch.
    pub fn refuse_next(&self) {
        self.inner.borrow_mut().refuse_next = true;
    }

    /// The run for `task_id` exits on its own.
    pub fn finish(&self, task_id: &str) {
        self.inner.borrow_mut().running.retain(|id| id != task_id);
    }
}

impl ExecutionEngine for RecordingEngine {
    fn start(&mut self, workload: Workload) -> Result<(), EngineError> {
        let mut log = self.inner.borrow_mut();
        if std::mem::take(&mut log.refuse_next) {
            return Err(EngineError::Launch {
                command: "recording".into(),
                reason: "refused".into(),
            });
        }
        if !log.running.contains(&workload.task_id) {
            log.running.push(workload.task_id.clone());
        }
        log.started.push(workload);
        Ok(())
    }

    fn stop(&mut self, task_id: &str) -> bool {
        let mut log = self.inner.borrow_mut();
        log.stopped.push(task_id.to_string());
        let was_running = log.running.iter().any(|id| id == task_id);
        log.running.retain(|id| id != task_id);
        was_running
    }
}

pub struct Harness {
    pub agent: Agent<RecordingTransport, RecordingEngine>,
    pub transport: RecordingTransport,
    pub engine: RecordingEngine,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(config())
    }

    pub fn with_config(config: PropletConfig) -> Self {
        let transport = RecordingTransport::new();
        let engine = RecordingEngine::default();
        let agent = Agent::new(&config, key(), transport.clone(), engine.clone());
        Self {
            agent,
            transport,
            engine,
        }
    }

    /// Deliver one inbound publish the way the daemon's control loop does.
    pub fn deliver(&mut self, t: Topic, payload: &serde_json::Value) {
        let body = payload.to_string();
        self.agent.route(&topic(t), body.as_bytes());
    }
}

pub fn config() -> PropletConfig {
    let mut config = PropletConfig::default();
    config.identity.proplet_id = PROPLET_ID.into();
    config.channel.domain_id = DOMAIN.into();
    config.channel.channel_id = CHANNEL.into();
    config.workload.key_hex = KEY_HEX.into();
    config
}

/// Encrypt `plaintext` the way the control plane does.
/// Returns the envelope and its digest.
pub fn seal(plaintext: &[u8]) -> Result<(Vec<u8>, String)> {
    let envelope = crypto::seal(plaintext, &key()).context("seal failed")?;
    let digest = crypto::sha256_hex(&envelope);
    Ok((envelope, digest))
}

pub fn inline_start(id: &str, envelope: &[u8], checksum: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "name": "job",
        "file": STANDARD.encode(envelope),
        "checksum": checksum,
        "inputs": [1, 2],
    })
}

pub fn registry_start(id: &str) -> serde_json::Value {
    serde_json::json!({ "id": id, "name": "job", "image_url": "registry.local/app:1" })
}

/// Split `envelope` into registry chunks of `size` bytes, checksum on chunk 0.
pub fn chunks(envelope: &[u8], size: usize, checksum: &str) -> Vec<serde_json::Value> {
    let parts: Vec<&[u8]> = envelope.chunks(size).collect();
    let total = parts.len();
    parts
        .iter()
        .enumerate()
        .map(|(i, part)| {
            let mut chunk = serde_json::json!({
                "chunk_idx": i,
                "total_chunks": total,
                "data": STANDARD.encode(part),
            });
            if i == 0 {
                chunk["checksum"] = checksum.into();
            }
            chunk
        })
        .collect()
}
