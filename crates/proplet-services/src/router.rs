//! Inbound topic classification. Exact string match only, no wildcards.

use proplet_core::{Channel, Topic};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Start,
    Stop,
    RegistryResponse,
}

impl Route {
    pub fn topic(self) -> Topic {
        match self {
            Route::Start => Topic::Start,
            Route::Stop => Topic::Stop,
            Route::RegistryResponse => Topic::RegistryResponse,
        }
    }
}

pub struct Router {
    start: String,
    stop: String,
    registry: String,
}

impl Router {
    pub fn new(channel: &Channel) -> Self {
        Self {
            start: channel.topic(Topic::Start),
            stop: channel.topic(Topic::Stop),
            registry: channel.topic(Topic::RegistryResponse),
        }
    }

    pub fn classify(&self, topic: &str) -> Option<Route> {
        if topic == self.start {
            Some(Route::Start)
        } else if topic == self.stop {
            Some(Route::Stop)
        } else if topic == self.registry {
            Some(Route::RegistryResponse)
        } else {
            None
        }
    }

    /// The topics to subscribe to.
    pub fn subscriptions(&self) -> [&str; 3] {
        [&self.start, &self.stop, &self.registry]
    }
}
