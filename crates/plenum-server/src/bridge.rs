//! Event→broadcast bridge.
//!
//! Consumes the typed device-event stream and turns each event into a
//! fan-out delivery: telemetry and status go to the reporting device's
//! room, alerts go to everyone, discovery updates the device directory.
//! Events from devices with no room assignment produce no room-scoped
//! delivery.

use crate::metrics;
use plenum_core::event::EventPayload;
use plenum_core::{DeviceDirectory, DeviceEvent, Registry};
use plenum_protocol::ServerMessage;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Where an event's broadcast goes.
#[derive(Debug)]
pub enum Dispatch {
    /// Deliver to subscribers of one room.
    Room {
        room_id: String,
        message: ServerMessage,
    },
    /// Deliver to every connection.
    Global(ServerMessage),
    /// Nothing to deliver.
    Drop,
}

/// Run the bridge until the event channel closes.
pub async fn run(
    mut events: mpsc::UnboundedReceiver<DeviceEvent>,
    registry: Arc<Registry>,
    directory: Arc<DeviceDirectory>,
) {
    while let Some(event) = events.recv().await {
        metrics::record_event(event.kind().as_str());

        match dispatch_event(event, &directory) {
            Dispatch::Room { room_id, message } => {
                let recipients = registry.broadcast_room(&room_id, &message);
                metrics::record_broadcast("room");
                trace!(room = %room_id, recipients, "Room broadcast");
            }
            Dispatch::Global(message) => {
                let recipients = registry.broadcast_all(&message);
                metrics::record_broadcast("global");
                trace!(recipients, "Global broadcast");
            }
            Dispatch::Drop => {}
        }
    }
    debug!("Event channel closed, bridge stopped");
}

/// Map one device event to its broadcast.
pub fn dispatch_event(event: DeviceEvent, directory: &DeviceDirectory) -> Dispatch {
    let device_id = event.device_id;

    match event.payload {
        EventPayload::Telemetry(telemetry) => match directory.room_for(&device_id) {
            Some(room_id) => {
                let mut data = serde_json::to_value(&telemetry).unwrap_or_default();
                data["deviceId"] = json!(device_id);
                data["roomId"] = json!(room_id);
                Dispatch::Room {
                    room_id,
                    message: ServerMessage::sensor_data(data),
                }
            }
            None => {
                debug!(device = %device_id, "Telemetry from unmapped device dropped");
                Dispatch::Drop
            }
        },

        EventPayload::Status(status) => match directory.room_for(&device_id) {
            Some(room_id) => Dispatch::Room {
                room_id,
                message: ServerMessage::device_status(json!({
                    "deviceId": device_id,
                    "status": status,
                })),
            },
            None => {
                debug!(device = %device_id, "Status from unmapped device dropped");
                Dispatch::Drop
            }
        },

        // Alerts are fleet-wide regardless of room interest.
        EventPayload::Alert(alert) => Dispatch::Global(ServerMessage::alert(json!({
            "deviceId": device_id,
            "severity": alert.severity,
            "message": alert.message,
            "type": alert.alert_type,
        }))),

        EventPayload::Discovery(announcement) => {
            if let Some(room_id) = announcement.get("roomId").and_then(|r| r.as_str()) {
                directory.assign(&device_id, room_id);
            }
            match directory.room_for(&device_id) {
                Some(room_id) => Dispatch::Room {
                    room_id: room_id.clone(),
                    message: ServerMessage::room_update(json!({
                        "deviceId": device_id,
                        "roomId": room_id,
                        "announcement": announcement,
                    })),
                },
                None => {
                    debug!(device = %device_id, "Discovery without room assignment");
                    Dispatch::Drop
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plenum_protocol::payload::{
        AlertPayload, AlertSeverity, DeviceStatus, SensorReadings, TelemetryPayload,
    };
    use plenum_protocol::MessageType;

    fn directory() -> DeviceDirectory {
        let directory = DeviceDirectory::new();
        directory.seed([("device-1", "room-1")]);
        directory
    }

    fn telemetry_event(device: &str) -> DeviceEvent {
        DeviceEvent::telemetry(
            device,
            TelemetryPayload {
                sensors: SensorReadings {
                    temperature: 23.0,
                    humidity: 50.0,
                    pressure: 101325.0,
                },
                battery: None,
                rssi: None,
                firmware: None,
                uptime: None,
            },
        )
    }

    #[test]
    fn test_telemetry_routes_to_room() {
        match dispatch_event(telemetry_event("device-1"), &directory()) {
            Dispatch::Room { room_id, message } => {
                assert_eq!(room_id, "room-1");
                assert_eq!(message.message_type, MessageType::SensorData);
                assert_eq!(message.data["deviceId"], "device-1");
                assert_eq!(message.data["roomId"], "room-1");
                assert_eq!(message.data["sensors"]["temperature"], 23.0);
            }
            other => panic!("expected room dispatch, got {other:?}"),
        }
    }

    #[test]
    fn test_unmapped_device_dropped() {
        assert!(matches!(
            dispatch_event(telemetry_event("device-99"), &directory()),
            Dispatch::Drop
        ));
    }

    #[test]
    fn test_status_routes_to_room() {
        let event = DeviceEvent::status("device-1", DeviceStatus::Error);
        match dispatch_event(event, &directory()) {
            Dispatch::Room { room_id, message } => {
                assert_eq!(room_id, "room-1");
                assert_eq!(message.message_type, MessageType::DeviceStatus);
                assert_eq!(message.data["status"], "error");
            }
            other => panic!("expected room dispatch, got {other:?}"),
        }
    }

    #[test]
    fn test_alert_is_global() {
        let event = DeviceEvent::alert(
            "device-42",
            AlertPayload {
                severity: AlertSeverity::High,
                message: "filter clogged".to_string(),
                alert_type: Some("maintenance".to_string()),
            },
        );
        match dispatch_event(event, &directory()) {
            Dispatch::Global(message) => {
                assert_eq!(message.message_type, MessageType::Alert);
                assert_eq!(message.data["severity"], "high");
                assert_eq!(message.data["deviceId"], "device-42");
            }
            other => panic!("expected global dispatch, got {other:?}"),
        }
    }

    #[test]
    fn test_discovery_assigns_room_and_announces() {
        let dir = directory();
        let event = DeviceEvent::discovery(
            "device-7",
            json!({"deviceId": "device-7", "roomId": "room-3", "firmware": "1.2.0"}),
        );

        match dispatch_event(event, &dir) {
            Dispatch::Room { room_id, message } => {
                assert_eq!(room_id, "room-3");
                assert_eq!(message.message_type, MessageType::RoomUpdate);
            }
            other => panic!("expected room dispatch, got {other:?}"),
        }

        // Later telemetry from the discovered device now has a room.
        assert_eq!(dir.room_for("device-7"), Some("room-3".to_string()));
        assert!(matches!(
            dispatch_event(telemetry_event("device-7"), &dir),
            Dispatch::Room { .. }
        ));
    }

    #[test]
    fn test_discovery_without_room_dropped() {
        let event = DeviceEvent::discovery("device-8", json!({"vendor": "acme"}));
        assert!(matches!(
            dispatch_event(event, &directory()),
            Dispatch::Drop
        ));
    }
}
