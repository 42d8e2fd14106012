//! Normalized device events.
//!
//! A [`DeviceEvent`] is the unit the ingest side hands to the fan-out
//! bridge: one decoded device message with its origin, kind-specific
//! payload and a relay-assigned timestamp. Events are immutable and
//! consumed exactly once; the relay never persists them.

use plenum_protocol::now_millis;
use plenum_protocol::payload::{AlertPayload, DeviceStatus, TelemetryPayload};

/// Event classification, mirroring the topic the message arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Telemetry,
    Status,
    Alert,
    Discovery,
}

impl EventKind {
    /// Stable lowercase name, used for log fields and metric labels.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Telemetry => "telemetry",
            EventKind::Status => "status",
            EventKind::Alert => "alert",
            EventKind::Discovery => "discovery",
        }
    }
}

/// Kind-specific event payload.
#[derive(Debug, Clone)]
pub enum EventPayload {
    Telemetry(TelemetryPayload),
    Status(DeviceStatus),
    Alert(AlertPayload),
    /// Raw device announcement data.
    Discovery(serde_json::Value),
}

/// A normalized device event.
///
/// The timestamp is assigned here, at event creation, not taken from the
/// broker.
#[derive(Debug, Clone)]
pub struct DeviceEvent {
    pub device_id: String,
    pub payload: EventPayload,
    /// Unix millis at event creation.
    pub timestamp: u64,
}

impl DeviceEvent {
    fn new(device_id: impl Into<String>, payload: EventPayload) -> Self {
        Self {
            device_id: device_id.into(),
            payload,
            timestamp: now_millis(),
        }
    }

    #[must_use]
    pub fn telemetry(device_id: impl Into<String>, payload: TelemetryPayload) -> Self {
        Self::new(device_id, EventPayload::Telemetry(payload))
    }

    #[must_use]
    pub fn status(device_id: impl Into<String>, status: DeviceStatus) -> Self {
        Self::new(device_id, EventPayload::Status(status))
    }

    #[must_use]
    pub fn alert(device_id: impl Into<String>, alert: AlertPayload) -> Self {
        Self::new(device_id, EventPayload::Alert(alert))
    }

    #[must_use]
    pub fn discovery(device_id: impl Into<String>, data: serde_json::Value) -> Self {
        Self::new(device_id, EventPayload::Discovery(data))
    }

    /// The event's classification.
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match &self.payload {
            EventPayload::Telemetry(_) => EventKind::Telemetry,
            EventPayload::Status(_) => EventKind::Status,
            EventPayload::Alert(_) => EventKind::Alert,
            EventPayload::Discovery(_) => EventKind::Discovery,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plenum_protocol::payload::SensorReadings;

    fn sample_telemetry() -> TelemetryPayload {
        TelemetryPayload {
            sensors: SensorReadings {
                temperature: 22.0,
                humidity: 45.0,
                pressure: 101325.0,
            },
            battery: Some(90.0),
            rssi: Some(-60.0),
            firmware: Some("1.0.0".to_string()),
            uptime: Some(120),
        }
    }

    #[test]
    fn test_event_kind() {
        let event = DeviceEvent::telemetry("device-1", sample_telemetry());
        assert_eq!(event.kind(), EventKind::Telemetry);
        assert_eq!(event.device_id, "device-1");

        let event = DeviceEvent::status("device-1", DeviceStatus::Online);
        assert_eq!(event.kind(), EventKind::Status);

        let event = DeviceEvent::discovery("device-2", serde_json::json!({"roomId": "room-2"}));
        assert_eq!(event.kind(), EventKind::Discovery);
    }

    #[test]
    fn test_event_timestamp_assigned() {
        let before = now_millis();
        let event = DeviceEvent::status("device-1", DeviceStatus::Offline);
        assert!(event.timestamp >= before);
        assert!(event.timestamp <= now_millis());
    }

    #[test]
    fn test_kind_names() {
        assert_eq!(EventKind::Telemetry.as_str(), "telemetry");
        assert_eq!(EventKind::Alert.as_str(), "alert");
    }
}
