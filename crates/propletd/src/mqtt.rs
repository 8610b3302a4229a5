//! MQTT adapter: the broker connection behind the agent's `Transport`.
//!
//! A pump task drives the rumqttc event loop. It subscribes on every CONNACK,
//! forwards inbound publishes to the control loop over a bounded channel,
//! and keeps polling after errors so the client reconnects on its own.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use bytes::Bytes;
use rumqttc::{
    AsyncClient, Event, EventLoop, LastWill, MqttOptions, Packet, QoS, TlsConfiguration,
};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use proplet_core::PropletConfig;
use proplet_services::publisher::last_will;
use proplet_services::{Router, Transport, TransportError};

/// Requests the client may buffer before `try_publish` starts failing.
const REQUEST_CAPACITY: usize = 64;

/// Inbound events waiting for the control loop.
const EVENT_CAPACITY: usize = 32;

/// Headroom over the base64 workload for the surrounding JSON.
const PACKET_OVERHEAD: usize = 64 * 1024;

#[derive(Debug)]
pub enum LinkEvent {
    Connected,
    Disconnected,
    Message { topic: String, payload: Bytes },
}

#[derive(Clone)]
pub struct MqttTransport {
    client: AsyncClient,
    connected: Arc<AtomicBool>,
}

impl Transport for MqttTransport {
    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), TransportError> {
        self.client
            .try_publish(topic, QoS::AtLeastOnce, false, payload)
            .map_err(|e| TransportError::Rejected(e.to_string()))
    }
}

/// Build the client and start the pump. The connection itself is made by
/// the pump's first poll.
pub fn connect(
    config: &PropletConfig,
) -> Result<(MqttTransport, mpsc::Receiver<LinkEvent>, JoinHandle<()>)> {
    let options = options(config)?;
    let (client, eventloop) = AsyncClient::new(options, REQUEST_CAPACITY);
    let connected = Arc::new(AtomicBool::new(false));
    let (events_tx, events_rx) = mpsc::channel(EVENT_CAPACITY);

    let subscriptions: Vec<String> = Router::new(&config.channel.channel())
        .subscriptions()
        .into_iter()
        .map(str::to_owned)
        .collect();

    let pump = tokio::spawn(pump(
        eventloop,
        client.clone(),
        connected.clone(),
        subscriptions,
        events_tx,
        Duration::from_secs(config.broker.reconnect_delay_secs),
    ));

    Ok((MqttTransport { client, connected }, events_rx, pump))
}

fn options(config: &PropletConfig) -> Result<MqttOptions> {
    let identity = &config.identity;
    let broker = &config.broker;

    let mut options = MqttOptions::new(identity.client_id(), &broker.host, broker.port);
    options.set_keep_alive(Duration::from_secs(broker.keep_alive_secs.max(5)));
    if !identity.password.is_empty() {
        options.set_credentials(identity.client_id(), &identity.password);
    }

    let will = last_will(
        &config.channel.channel(),
        &identity.proplet_id,
        &identity.namespace,
    )
    .context("failed to encode last will")?;
    options.set_last_will(LastWill::new(will.topic, will.payload, QoS::AtLeastOnce, true));

    let max_packet = max_packet_size(config.workload.max_workload_bytes);
    options.set_max_packet_size(max_packet, max_packet);

    if let Some(ca_path) = &broker.ca_cert_path {
        let ca = std::fs::read(ca_path)
            .with_context(|| format!("failed to read CA certificate {}", ca_path.display()))?;
        options.set_transport(rumqttc::Transport::tls_with_config(
            TlsConfiguration::Simple {
                ca,
                alpn: None,
                client_auth: None,
            },
        ));
        tracing::info!(ca = %ca_path.display(), "broker TLS enabled");
    } else {
        tracing::warn!("no broker CA configured, connecting without TLS");
    }

    Ok(options)
}

/// Largest publish we accept: an inline start carrying a full-size workload.
fn max_packet_size(max_workload_bytes: usize) -> usize {
    max_workload_bytes
        .div_ceil(3)
        .saturating_mul(4)
        .saturating_add(PACKET_OVERHEAD)
}

async fn pump(
    mut eventloop: EventLoop,
    client: AsyncClient,
    connected: Arc<AtomicBool>,
    subscriptions: Vec<String>,
    events: mpsc::Sender<LinkEvent>,
    reconnect_delay: Duration,
) {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                connected.store(true, Ordering::Release);
                tracing::info!(code = ?ack.code, "connected to broker");
                for topic in &subscriptions {
                    if let Err(e) = client.try_subscribe(topic.as_str(), QoS::AtLeastOnce) {
                        tracing::warn!(topic = %topic, error = %e, "subscribe failed");
                    }
                }
                if events.send(LinkEvent::Connected).await.is_err() {
                    return;
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                let event = LinkEvent::Message {
                    topic: publish.topic,
                    payload: publish.payload,
                };
                if events.send(event).await.is_err() {
                    return;
                }
            }
            Ok(_) => {}
            Err(e) => {
                if connected.swap(false, Ordering::AcqRel)
                    && events.send(LinkEvent::Disconnected).await.is_err()
                {
                    return;
                }
                tracing::warn!(
                    error = %e,
                    retry_in_secs = reconnect_delay.as_secs(),
                    "broker connection error"
                );
                tokio::time::sleep(reconnect_delay).await;
            }
        }
    }
}
