//! propletd: edge agent daemon. Receives workloads over MQTT, verifies and
//! decrypts them, and runs them through the configured runtime.

use std::time::Instant;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use proplet_core::{PropletConfig, WorkloadKey};
use proplet_services::{Agent, TransportError};

mod engine;
mod mqtt;

use engine::ProcessEngine;
use mqtt::LinkEvent;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = PropletConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = PropletConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        PropletConfig::default()
    });

    anyhow::ensure!(
        !config.identity.proplet_id.is_empty(),
        "identity.proplet_id is not set (PROPLET_IDENTITY__PROPLET_ID)"
    );
    anyhow::ensure!(
        !config.channel.domain_id.is_empty() && !config.channel.channel_id.is_empty(),
        "channel.domain_id and channel.channel_id must be set"
    );
    let key = WorkloadKey::from_hex(&config.workload.key_hex)
        .context("invalid workload.key_hex")?;

    tracing::info!(
        proplet_id = %config.identity.proplet_id,
        namespace = %config.identity.namespace,
        broker = %format!("{}:{}", config.broker.host, config.broker.port),
        work_dir = %config.workload.work_dir.display(),
        "propletd starting"
    );

    // ── Collaborators ────────────────────────────────────────────────────────

    let (completion_tx, mut completion_rx) = mpsc::unbounded_channel();
    let engine = ProcessEngine::new(&config.workload, completion_tx);
    let (transport, mut link_rx, pump_task) =
        mqtt::connect(&config).context("failed to set up broker connection")?;

    let mut agent = Agent::new(&config, key, transport, engine);

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, mut shutdown_rx) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Control loop ─────────────────────────────────────────────────────────
    // Every handler runs to completion here before the next event is read.

    let mut heartbeat = tokio::time::interval(config.heartbeat.interval());
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                tracing::info!("shutting down");
                break;
            }
            event = link_rx.recv() => match event {
                Some(LinkEvent::Connected) => {
                    if let Err(e) = agent.announce() {
                        tracing::warn!(error = %e, "failed to publish discovery");
                    }
                }
                Some(LinkEvent::Disconnected) => tracing::warn!("disconnected from broker"),
                Some(LinkEvent::Message { topic, payload }) => {
                    agent.route(&topic, &payload);
                }
                None => {
                    tracing::error!("broker pump exited");
                    break;
                }
            },
            Some(completion) = completion_rx.recv() => {
                if let Err(e) = agent.complete(completion) {
                    tracing::warn!(error = %e, "failed to publish results");
                }
            }
            _ = heartbeat.tick() => match agent.heartbeat(Instant::now()) {
                Ok(()) => tracing::debug!("heartbeat published"),
                Err(TransportError::NotConnected) => {
                    tracing::warn!("not connected to broker, heartbeat skipped")
                }
                Err(e) => tracing::warn!(error = %e, "failed to publish heartbeat"),
            },
        }
    }

    agent.engine_mut().shutdown();
    pump_task.abort();
    Ok(())
}
