//! Interval-driven telemetry simulator.
//!
//! When no broker is reachable the relay can keep its subscribers fed
//! with plausible synthetic telemetry: one batch immediately at start,
//! then one per interval, for a small fixed device set. The simulator
//! refuses to run in production mode.

use plenum_core::DeviceEvent;
use plenum_protocol::payload::{SensorReadings, TelemetryPayload};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// Simulator errors.
#[derive(Debug, Error)]
pub enum SimulatorError {
    /// Synthetic telemetry must never run against production.
    #[error("Simulator refused to start in production mode")]
    ProductionRefused,
}

/// Simulator configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Device ids to synthesize telemetry for.
    #[serde(default = "default_devices")]
    pub devices: Vec<String>,

    /// Emission interval in seconds.
    #[serde(default = "default_interval")]
    pub interval_secs: u64,
}

fn default_devices() -> Vec<String> {
    vec!["device-1".to_string(), "device-2".to_string()]
}

fn default_interval() -> u64 {
    30
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            devices: default_devices(),
            interval_secs: default_interval(),
        }
    }
}

/// Handle to a running simulator task.
pub struct Simulator {
    task: JoinHandle<()>,
}

impl Simulator {
    /// Start the simulator.
    ///
    /// Emits one telemetry event per configured device immediately, then
    /// one batch per interval.
    ///
    /// # Errors
    ///
    /// Returns [`SimulatorError::ProductionRefused`] when `production` is
    /// set.
    pub fn spawn(
        config: SimulatorConfig,
        production: bool,
        events: mpsc::UnboundedSender<DeviceEvent>,
    ) -> Result<Self, SimulatorError> {
        if production {
            return Err(SimulatorError::ProductionRefused);
        }

        info!(
            devices = config.devices.len(),
            interval_secs = config.interval_secs,
            "Starting mock telemetry"
        );

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_secs(config.interval_secs));
            loop {
                // First tick completes immediately, giving the initial batch.
                ticker.tick().await;
                for device_id in &config.devices {
                    let event = DeviceEvent::telemetry(device_id.clone(), mock_telemetry());
                    if events.send(event).is_err() {
                        debug!("Event channel closed, stopping simulator");
                        return;
                    }
                }
            }
        });

        Ok(Self { task })
    }

    /// Stop the simulator.
    pub fn stop(self) {
        self.task.abort();
    }
}

/// Plausible random sensor values for one reading.
fn mock_telemetry() -> TelemetryPayload {
    let mut rng = rand::thread_rng();
    TelemetryPayload {
        sensors: SensorReadings {
            temperature: rng.gen_range(20.0..30.0),
            humidity: rng.gen_range(40.0..60.0),
            pressure: 101_325.0 + rng.gen_range(-500.0..500.0),
        },
        battery: Some(rng.gen_range(80.0..100.0)),
        rssi: Some(rng.gen_range(-80.0..-50.0)),
        firmware: Some("1.0.0".to_string()),
        uptime: Some(rng.gen_range(0..86_400)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plenum_core::event::EventPayload;

    #[test]
    fn test_refuses_production_mode() {
        let (tx, _rx) = mpsc::unbounded_channel();
        // No runtime needed; the refusal happens before spawning.
        assert!(matches!(
            Simulator::spawn(SimulatorConfig::default(), true, tx),
            Err(SimulatorError::ProductionRefused)
        ));
    }

    #[test]
    fn test_mock_telemetry_ranges() {
        for _ in 0..200 {
            let reading = mock_telemetry();
            assert!((20.0..30.0).contains(&reading.sensors.temperature));
            assert!((40.0..60.0).contains(&reading.sensors.humidity));
            assert!((100_825.0..101_825.0).contains(&reading.sensors.pressure));
            assert!((80.0..100.0).contains(&reading.battery.unwrap()));
            assert!((-80.0..-50.0).contains(&reading.rssi.unwrap()));
            assert!(reading.uptime.unwrap() < 86_400);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_initial_batch_then_interval() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let simulator = Simulator::spawn(SimulatorConfig::default(), false, tx).unwrap();

        // Initial batch: one event per device, immediately.
        let first = rx.recv().await.unwrap();
        let second = rx.recv().await.unwrap();
        let mut devices = vec![first.device_id.clone(), second.device_id.clone()];
        devices.sort();
        assert_eq!(devices, vec!["device-1", "device-2"]);
        assert!(matches!(first.payload, EventPayload::Telemetry(_)));

        // Next batch arrives after the interval (paused clock auto-advances).
        let third = rx.recv().await.unwrap();
        assert!(matches!(third.payload, EventPayload::Telemetry(_)));

        simulator.stop();
    }
}
