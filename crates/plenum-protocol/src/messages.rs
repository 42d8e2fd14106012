//! JSON messages exchanged with real-time subscribers.
//!
//! Server→client messages share one envelope: `{type, data, timestamp}`
//! plus an optional `clientId` on messages addressed to one connection.
//! Client→server control messages are a small tagged set. Liveness probing
//! is WebSocket ping/pong and never appears at this layer.

use crate::now_millis;
use serde::{Deserialize, Serialize};

/// Server→client message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    SensorData,
    DeviceStatus,
    RoomUpdate,
    Alert,
    SystemStatus,
    /// Declared on the wire but currently never emitted; reserved for
    /// future error reporting to subscribers.
    Error,
}

/// A server→client message envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerMessage {
    #[serde(rename = "type")]
    pub message_type: MessageType,
    pub data: serde_json::Value,
    pub timestamp: u64,
    #[serde(rename = "clientId", skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl ServerMessage {
    /// Create an envelope of the given type.
    #[must_use]
    pub fn new(message_type: MessageType, data: serde_json::Value) -> Self {
        Self {
            message_type,
            data,
            timestamp: now_millis(),
            client_id: None,
        }
    }

    /// Address this message to a specific connection.
    #[must_use]
    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    #[must_use]
    pub fn sensor_data(data: serde_json::Value) -> Self {
        Self::new(MessageType::SensorData, data)
    }

    #[must_use]
    pub fn device_status(data: serde_json::Value) -> Self {
        Self::new(MessageType::DeviceStatus, data)
    }

    #[must_use]
    pub fn room_update(data: serde_json::Value) -> Self {
        Self::new(MessageType::RoomUpdate, data)
    }

    #[must_use]
    pub fn alert(data: serde_json::Value) -> Self {
        Self::new(MessageType::Alert, data)
    }

    #[must_use]
    pub fn system_status(data: serde_json::Value) -> Self {
        Self::new(MessageType::SystemStatus, data)
    }
}

/// A client→server control message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    SubscribeRoom {
        #[serde(rename = "roomId")]
        room_id: String,
    },
    UnsubscribeRoom {
        #[serde(rename = "roomId")]
        room_id: String,
    },
    GetStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_server_message_envelope() {
        let msg = ServerMessage::sensor_data(json!({"temperature": 21.0}));
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["type"], "sensor_data");
        assert_eq!(value["data"]["temperature"], 21.0);
        assert!(value["timestamp"].is_u64());
        // clientId is omitted unless addressed.
        assert!(value.get("clientId").is_none());
    }

    #[test]
    fn test_server_message_with_client_id() {
        let msg = ServerMessage::system_status(json!({"message": "welcome"}))
            .with_client_id("client-123");
        let value = serde_json::to_value(&msg).unwrap();

        assert_eq!(value["clientId"], "client-123");
    }

    #[test]
    fn test_message_type_names() {
        for (ty, name) in [
            (MessageType::SensorData, "sensor_data"),
            (MessageType::DeviceStatus, "device_status"),
            (MessageType::RoomUpdate, "room_update"),
            (MessageType::Alert, "alert"),
            (MessageType::SystemStatus, "system_status"),
            (MessageType::Error, "error"),
        ] {
            assert_eq!(serde_json::to_value(ty).unwrap(), name);
        }
    }

    #[test]
    fn test_client_message_parsing() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"subscribe_room","roomId":"room-1"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::SubscribeRoom {
                room_id: "room-1".to_string()
            }
        );

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"unsubscribe_room","roomId":"room-2"}"#).unwrap();
        assert_eq!(
            msg,
            ClientMessage::UnsubscribeRoom {
                room_id: "room-2".to_string()
            }
        );

        let msg: ClientMessage = serde_json::from_str(r#"{"type":"get_status"}"#).unwrap();
        assert_eq!(msg, ClientMessage::GetStatus);
    }

    #[test]
    fn test_unknown_client_message_rejected() {
        let result: Result<ClientMessage, _> =
            serde_json::from_str(r#"{"type":"set_temperature","value":25}"#);
        assert!(result.is_err());
    }
}
