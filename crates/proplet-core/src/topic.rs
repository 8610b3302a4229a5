//! Topic templates: the addressing contract with the control plane.
//!
//! Every topic is `m/{domain_id}/c/{channel_id}/{suffix}`. These strings ARE
//! the protocol: the manager publishes and subscribes on exactly these paths,
//! so changing a suffix is a breaking change for every deployed device.

use std::fmt;

/// Every topic the agent publishes or subscribes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Inbound: start a task.
    Start,
    /// Inbound: stop a task.
    Stop,
    /// Inbound: one chunk of a workload binary from the registry.
    RegistryResponse,
    /// Outbound: liveness heartbeat, and the last-will target.
    Alive,
    /// Outbound: first announcement after connecting.
    Discovery,
    /// Outbound: ask the registry to stream a workload.
    RegistryFetch,
    /// Outbound: workload results.
    Results,
    /// Outbound: a chunked workload was received and verified.
    RegistryAck,
}

impl Topic {
    /// Path below `m/{domain}/c/{channel}/`.
    pub fn suffix(self) -> &'static str {
        match self {
            Topic::Start => "control/manager/start",
            Topic::Stop => "control/manager/stop",
            Topic::RegistryResponse => "registry/server",
            Topic::Alive => "control/proplet/alive",
            Topic::Discovery => "control/proplet/create",
            Topic::RegistryFetch => "registry/proplet",
            Topic::Results => "control/proplet/results",
            Topic::RegistryAck => "control/manager/registry",
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.suffix())
    }
}

/// The domain/channel pair every topic is scoped to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Channel {
    pub domain_id: String,
    pub channel_id: String,
}

impl Channel {
    pub fn new(domain_id: impl Into<String>, channel_id: impl Into<String>) -> Self {
        Self {
            domain_id: domain_id.into(),
            channel_id: channel_id.into(),
        }
    }

    /// Fully-qualified topic string for this channel.
    pub fn topic(&self, topic: Topic) -> String {
        format!(
            "m/{}/c/{}/{}",
            self.domain_id,
            self.channel_id,
            topic.suffix()
        )
    }
}
