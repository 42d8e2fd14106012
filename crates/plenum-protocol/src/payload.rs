//! JSON payload shapes on the MQTT side.
//!
//! Devices report readings from combined temperature/humidity/pressure
//! sensor boards; the relay sends back structured commands. Everything on
//! the wire is plain JSON.

use crate::now_millis;
use serde::{Deserialize, Serialize};

/// Sensor readings inside a telemetry payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReadings {
    /// Celsius.
    pub temperature: f64,
    /// Relative humidity, percent.
    pub humidity: f64,
    /// Pascal.
    pub pressure: f64,
}

/// A device telemetry report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TelemetryPayload {
    pub sensors: SensorReadings,
    /// Battery level, percent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery: Option<f64>,
    /// Signal strength, dBm.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rssi: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub firmware: Option<String>,
    /// Seconds since device boot.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub uptime: Option<u64>,
}

/// Device operational status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeviceStatus {
    Online,
    Offline,
    Error,
    Maintenance,
}

/// A device status report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusPayload {
    pub status: DeviceStatus,
}

/// Alert severity levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
}

/// A device alert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertPayload {
    pub severity: AlertSeverity,
    pub message: String,
    /// Alert type tag, e.g. `high_temperature` or `low_battery`.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub alert_type: Option<String>,
}

/// Retained server status published on connect, disconnect and as the
/// broker last-will.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerStatus {
    pub status: ServerState,
    pub timestamp: u64,
    pub version: String,
}

/// Relay availability as seen by devices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerState {
    Online,
    Offline,
}

impl ServerStatus {
    #[must_use]
    pub fn new(status: ServerState) -> Self {
        Self {
            status,
            timestamp: now_millis(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Outbound device commands.
///
/// Published fire-and-forget to `hvac/devices/{deviceId}/commands`. Every
/// command carries a generated id and an injected timestamp.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    VentControl {
        /// Vent position, 0-100.
        position: u8,
        #[serde(skip_serializing_if = "Option::is_none")]
        duration: Option<u64>,
        id: String,
    },
    Configuration {
        config: serde_json::Value,
        id: String,
    },
    OtaUpdate {
        #[serde(rename = "firmwareUrl")]
        firmware_url: String,
        id: String,
    },
    StatusRequest {
        id: String,
    },
}

impl Command {
    #[must_use]
    pub fn vent_control(position: u8, duration: Option<u64>) -> Self {
        Command::VentControl {
            position,
            duration,
            id: format!("cmd-{}", now_millis()),
        }
    }

    #[must_use]
    pub fn configuration(config: serde_json::Value) -> Self {
        Command::Configuration {
            config,
            id: format!("cfg-{}", now_millis()),
        }
    }

    #[must_use]
    pub fn ota_update(firmware_url: impl Into<String>) -> Self {
        Command::OtaUpdate {
            firmware_url: firmware_url.into(),
            id: format!("ota-{}", now_millis()),
        }
    }

    #[must_use]
    pub fn status_request() -> Self {
        Command::StatusRequest {
            id: format!("status-{}", now_millis()),
        }
    }
}
