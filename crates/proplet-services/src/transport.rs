//! Publish side of the pub/sub transport, as seen by the agent.
//!
//! Connection management, keepalive and retry belong to the implementation
//! (the daemon's MQTT adapter). The agent only needs to know whether the
//! link is up and to hand off a payload for at-least-once delivery.

use thiserror::Error;

pub trait Transport {
    fn is_connected(&self) -> bool;

    /// Queue `payload` for delivery on `topic`. Implementations must not
    /// block on the network.
    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        (**self).publish(topic, payload)
    }
}

// ── Errors ────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("transport not connected")]
    NotConnected,

    #[error("transport rejected publish: {0}")]
    Rejected(String),

    #[error("failed to encode payload: {0}")]
    Encode(#[from] serde_json::Error),
}
