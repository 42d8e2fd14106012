//! # Plenum relay server
//!
//! Smart-HVAC device-telemetry relay: MQTT in, WebSocket fan-out.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! plenum
//!
//! # Run with a config file at ./plenum.toml
//! plenum
//!
//! # Run with environment variables
//! PLENUM_PORT=3003 PLENUM_MQTT_HOST=broker.local plenum
//! ```
//!
//! Without a reachable broker the relay falls back to simulated
//! telemetry (development mode only).

mod bridge;
mod config;
mod handlers;
mod metrics;

use anyhow::Result;
use plenum_core::{DeviceDirectory, Registry};
use plenum_ingest::{MqttIngest, Simulator};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "plenum=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    info!("Starting Plenum relay on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();
    if config.metrics.enabled {
        if let Err(e) = metrics::start_metrics_server(config.metrics.port) {
            warn!(error = %e, "Failed to start metrics server");
        }
    }

    let registry = Arc::new(Registry::new());
    let directory = Arc::new(DeviceDirectory::new());
    directory.seed(config.rooms.clone());

    // Event stream: broker session if reachable, simulator otherwise.
    let (events_tx, events_rx) = mpsc::unbounded_channel();

    let ingest = match MqttIngest::connect(&config.mqtt, events_tx.clone()).await {
        Ok(ingest) => Some(ingest),
        Err(e) => {
            warn!(error = %e, "MQTT broker not available");
            None
        }
    };

    let simulator = if ingest.is_none() {
        match Simulator::spawn(
            config.simulator.clone(),
            config.is_production(),
            events_tx.clone(),
        ) {
            Ok(simulator) => Some(simulator),
            Err(e) => {
                warn!(error = %e, "Running without an event source");
                None
            }
        }
    } else {
        None
    };
    drop(events_tx);

    info!(
        "Device communication: {}",
        if ingest.is_some() {
            "MQTT connected"
        } else if simulator.is_some() {
            "development mode (mock data)"
        } else {
            "no event source"
        }
    );

    // Fan-out bridge.
    let bridge_task = tokio::spawn(bridge::run(
        events_rx,
        registry.clone(),
        directory.clone(),
    ));

    // Liveness probe cycle.
    let probe_registry = registry.clone();
    let probe_interval = Duration::from_millis(config.heartbeat.interval_ms);
    let probe_task = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(probe_interval);
        ticker.tick().await; // first sweep happens one interval in
        loop {
            ticker.tick().await;
            let evicted = probe_registry.sweep();
            if !evicted.is_empty() {
                metrics::record_evictions(evicted.len());
            }
        }
    });

    // Serve until ctrl-c.
    let state = Arc::new(handlers::AppState::new(
        config.clone(),
        registry.clone(),
        directory,
    ));
    handlers::run_server(state).await?;

    // The shutdown signal already closed every subscriber connection
    // before the server resolved; what remains is cancelling the timers
    // and announcing offline on the broker.
    info!("Shutting down");
    probe_task.abort();
    if let Some(simulator) = simulator {
        simulator.stop();
    }
    if let Some(ingest) = ingest {
        ingest.disconnect().await;
    }
    bridge_task.abort();

    Ok(())
}
