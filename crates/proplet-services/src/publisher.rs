//! Control-plane publisher: outbound status, result and ack messages.
//!
//! Each message is a serde struct from `proplet_core::message` rendered as
//! JSON and published on its fixed topic. A publish while the transport is
//! down fails with [`TransportError::NotConnected`]; nothing is queued here.

use proplet_core::message::{
    AckStatus, AliveMessage, DiscoveryMessage, Liveness, RegistryAck, RegistryFetchRequest,
    ResultsMessage,
};
use proplet_core::{Channel, Topic};
use serde::Serialize;

use crate::transport::{Transport, TransportError};

/// A rendered message, for callers that hand it to the transport themselves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outbound {
    pub topic: String,
    pub payload: Vec<u8>,
}

pub struct ControlPublisher<T> {
    transport: T,
    channel: Channel,
    proplet_id: String,
    namespace: String,
}

impl<T: Transport> ControlPublisher<T> {
    pub fn new(transport: T, channel: Channel, proplet_id: String, namespace: String) -> Self {
        Self {
            transport,
            channel,
            proplet_id,
            namespace,
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn publish<M: Serialize>(&self, topic: Topic, message: &M) -> Result<(), TransportError> {
        if !self.transport.is_connected() {
            return Err(TransportError::NotConnected);
        }
        let payload = serde_json::to_vec(message)?;
        let topic = self.channel.topic(topic);
        tracing::debug!(topic = %topic, bytes = payload.len(), "publishing");
        self.transport.publish(&topic, payload)
    }

    pub fn alive(&self) -> Result<(), TransportError> {
        self.publish(
            Topic::Alive,
            &AliveMessage {
                status: Liveness::Alive,
                proplet_id: self.proplet_id.clone(),
                namespace: self.namespace.clone(),
            },
        )
    }

    pub fn discovery(&self) -> Result<(), TransportError> {
        self.publish(
            Topic::Discovery,
            &DiscoveryMessage {
                proplet_id: self.proplet_id.clone(),
            },
        )
    }

    pub fn registry_fetch(&self, app_name: &str) -> Result<(), TransportError> {
        self.publish(
            Topic::RegistryFetch,
            &RegistryFetchRequest {
                app_name: app_name.to_string(),
            },
        )
    }

    pub fn results(
        &self,
        task_id: &str,
        results: Vec<i64>,
        error: Option<String>,
    ) -> Result<(), TransportError> {
        self.publish(
            Topic::Results,
            &ResultsMessage {
                task_id: task_id.to_string(),
                results,
                error,
            },
        )
    }

    pub fn registry_ack(&self, task_id: &str) -> Result<(), TransportError> {
        self.publish(
            Topic::RegistryAck,
            &RegistryAck {
                id: task_id.to_string(),
                status: AckStatus::Downloaded,
            },
        )
    }
}

/// The offline notice the broker publishes for us on an ungraceful disconnect.
pub fn last_will(
    channel: &Channel,
    proplet_id: &str,
    namespace: &str,
) -> Result<Outbound, TransportError> {
    let payload = serde_json::to_vec(&AliveMessage {
        status: Liveness::Offline,
        proplet_id: proplet_id.to_string(),
        namespace: namespace.to_string(),
    })?;
    Ok(Outbound {
        topic: channel.topic(Topic::Alive),
        payload,
    })
}
