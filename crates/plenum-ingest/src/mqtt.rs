//! MQTT ingest adapter.
//!
//! Bridges the broker into the typed [`DeviceEvent`] stream. The session
//! registers a retained last-will announcing the relay offline, subscribes
//! the four device topic patterns, and hands every decodable publish to
//! the event channel. Undecodable payloads are logged and dropped; they
//! never terminate the session.

use plenum_core::DeviceEvent;
use plenum_protocol::now_millis;
use plenum_protocol::payload::{
    AlertPayload, Command, ServerState, ServerStatus, StatusPayload, TelemetryPayload,
};
use plenum_protocol::topics::{self, TopicKind};
use rumqttc::{AsyncClient, Event, EventLoop, LastWill, MqttOptions, Outgoing, Packet, QoS};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Ingest errors.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The broker did not accept the session within the connect timeout.
    #[error("Broker connection timed out")]
    ConnectTimeout,

    /// Transport-level failure while establishing the session.
    #[error("Broker connection failed: {0}")]
    Connection(#[from] rumqttc::ConnectionError),

    /// Client request failure (subscribe, publish, disconnect).
    #[error("MQTT client error: {0}")]
    Client(#[from] rumqttc::ClientError),
}

/// Broker session configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MqttConfig {
    /// Broker host.
    #[serde(default = "default_mqtt_host")]
    pub host: String,

    /// Broker port.
    #[serde(default = "default_mqtt_port")]
    pub port: u16,

    #[serde(default)]
    pub username: Option<String>,

    #[serde(default)]
    pub password: Option<String>,

    /// Keepalive interval in seconds.
    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// Bound on the initial connection attempt. Exceeding it fails the
    /// connect without retry; the caller decides whether to fall back to
    /// the simulator.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_ms: u64,

    /// Cap on consecutive reconnect attempts after a transport drop.
    /// Exceeding it terminates the session.
    #[serde(default = "default_max_reconnects")]
    pub max_reconnect_attempts: u32,
}

fn default_mqtt_host() -> String {
    std::env::var("PLENUM_MQTT_HOST").unwrap_or_else(|_| "localhost".to_string())
}

fn default_mqtt_port() -> u16 {
    std::env::var("PLENUM_MQTT_PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(1883)
}

fn default_keep_alive() -> u64 {
    60
}

fn default_connect_timeout() -> u64 {
    30_000
}

fn default_max_reconnects() -> u32 {
    10
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: default_mqtt_host(),
            port: default_mqtt_port(),
            username: None,
            password: None,
            keep_alive_secs: default_keep_alive(),
            connect_timeout_ms: default_connect_timeout(),
            max_reconnect_attempts: default_max_reconnects(),
        }
    }
}

/// A live broker session.
///
/// The session handle is owned here exclusively; other components only
/// ever call the publish methods.
pub struct MqttIngest {
    client: AsyncClient,
    event_task: JoinHandle<()>,
}

impl MqttIngest {
    /// Establish a broker session and start the ingest loop.
    ///
    /// Fails without retry if the broker does not accept the session
    /// within the configured timeout.
    ///
    /// # Errors
    ///
    /// Returns an error on connect timeout, transport failure, or if the
    /// initial subscriptions cannot be requested.
    pub async fn connect(
        config: &MqttConfig,
        events: mpsc::UnboundedSender<DeviceEvent>,
    ) -> Result<Self, IngestError> {
        let client_id = format!("plenum-server-{}", now_millis());
        let mut options = MqttOptions::new(client_id, &config.host, config.port);
        options.set_keep_alive(Duration::from_secs(config.keep_alive_secs));

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username, password);
        }

        // Retained last-will: the broker announces us offline if the
        // session drops uncleanly.
        let will_payload = status_payload(ServerState::Offline);
        options.set_last_will(LastWill::new(
            topics::SERVER_STATUS_TOPIC,
            will_payload,
            QoS::AtLeastOnce,
            true,
        ));

        let (client, mut event_loop) = AsyncClient::new(options, 64);

        // Await the CONNACK under a bounded timeout; no retry here.
        let timeout = Duration::from_millis(config.connect_timeout_ms);
        match tokio::time::timeout(timeout, wait_for_connack(&mut event_loop)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => return Err(e),
            Err(_) => return Err(IngestError::ConnectTimeout),
        }

        info!(host = %config.host, port = config.port, "Connected to MQTT broker");

        subscribe_patterns(&client).await?;
        publish_server_status(&client, ServerState::Online).await;

        let max_reconnects = config.max_reconnect_attempts;
        let loop_client = client.clone();
        let event_task = tokio::spawn(async move {
            run_event_loop(event_loop, loop_client, events, max_reconnects).await;
        });

        Ok(Self { client, event_task })
    }

    /// Publish a command to a device. Fire-and-forget: failures are
    /// logged, never raised, and no acknowledgement is tracked.
    pub async fn publish_command(&self, device_id: &str, command: &Command) {
        let topic = topics::command_topic(device_id);
        let payload = command_payload(command).to_string();

        match self
            .client
            .publish(&topic, QoS::AtLeastOnce, false, payload)
            .await
        {
            Ok(()) => debug!(device = %device_id, topic = %topic, "Command published"),
            Err(e) => warn!(device = %device_id, error = %e, "Failed to publish command"),
        }
    }

    /// Publish a vent position command.
    pub async fn publish_vent_control(&self, device_id: &str, position: u8, duration: Option<u64>) {
        self.publish_command(device_id, &Command::vent_control(position, duration))
            .await;
    }

    /// Publish a configuration update.
    pub async fn publish_configuration(&self, device_id: &str, config: serde_json::Value) {
        self.publish_command(device_id, &Command::configuration(config))
            .await;
    }

    /// Publish a firmware update request.
    pub async fn publish_ota_update(&self, device_id: &str, firmware_url: &str) {
        self.publish_command(device_id, &Command::ota_update(firmware_url))
            .await;
    }

    /// Ask a device (or the whole fleet) to report its status.
    pub async fn request_device_status(&self, device_id: Option<&str>) {
        let target = device_id.unwrap_or(topics::BROADCAST_DEVICE);
        self.publish_command(target, &Command::status_request())
            .await;
    }

    /// Publish a retained offline status and end the session.
    ///
    /// Both the status publish and the DISCONNECT are only enqueued here;
    /// they reach the wire when the event loop polls them out, so wait
    /// for the loop to drain rather than aborting it.
    pub async fn disconnect(self) {
        publish_server_status(&self.client, ServerState::Offline).await;

        if let Err(e) = self.client.disconnect().await {
            warn!(error = %e, "MQTT disconnect failed");
            self.event_task.abort();
            return;
        }

        match tokio::time::timeout(Duration::from_secs(5), self.event_task).await {
            Ok(_) => info!("MQTT session closed"),
            Err(_) => warn!("Timed out draining the MQTT session"),
        }
    }
}

/// Poll the event loop until the broker accepts the session.
async fn wait_for_connack(event_loop: &mut EventLoop) -> Result<(), IngestError> {
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(_))) => return Ok(()),
            Ok(_) => {}
            Err(e) => return Err(IngestError::Connection(e)),
        }
    }
}

/// Subscribe the four device topic patterns at QoS 1.
async fn subscribe_patterns(client: &AsyncClient) -> Result<(), IngestError> {
    for pattern in topics::SUBSCRIPTION_PATTERNS {
        client.subscribe(pattern, QoS::AtLeastOnce).await?;
        debug!(pattern = %pattern, "Subscribed");
    }
    Ok(())
}

/// Publish the retained relay status. Failures are logged only.
async fn publish_server_status(client: &AsyncClient, state: ServerState) {
    let payload = status_payload(state);
    if let Err(e) = client
        .publish(topics::SERVER_STATUS_TOPIC, QoS::AtLeastOnce, true, payload)
        .await
    {
        warn!(error = %e, "Failed to publish server status");
    }
}

fn status_payload(state: ServerState) -> Vec<u8> {
    serde_json::to_vec(&ServerStatus::new(state)).unwrap_or_default()
}

/// Serialize a command with the injected publish timestamp.
#[must_use]
pub fn command_payload(command: &Command) -> serde_json::Value {
    let mut payload = serde_json::to_value(command).unwrap_or_default();
    payload["timestamp"] = now_millis().into();
    payload
}

/// Whether an event marks the DISCONNECT packet leaving for the wire,
/// ending a clean session shutdown.
fn is_clean_disconnect(event: &Event) -> bool {
    matches!(event, Event::Outgoing(Outgoing::Disconnect))
}

/// The ingest loop: decode publishes, resubscribe on reconnect, give up
/// after the reconnect cap.
async fn run_event_loop(
    mut event_loop: EventLoop,
    client: AsyncClient,
    events: mpsc::UnboundedSender<DeviceEvent>,
    max_reconnects: u32,
) {
    let mut reconnect_attempts: u32 = 0;

    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                reconnect_attempts = 0;
                if let Some(event) = decode_publish(&publish.topic, &publish.payload) {
                    if events.send(event).is_err() {
                        debug!("Event channel closed, stopping ingest loop");
                        return;
                    }
                }
            }
            Ok(Event::Incoming(Packet::ConnAck(_))) => {
                reconnect_attempts = 0;
                info!("MQTT session re-established");
                if let Err(e) = subscribe_patterns(&client).await {
                    warn!(error = %e, "Resubscribe failed");
                }
            }
            Ok(event) if is_clean_disconnect(&event) => {
                debug!("Disconnect handed to the wire, stopping ingest loop");
                return;
            }
            Ok(_) => {}
            Err(e) => {
                reconnect_attempts += 1;
                if reconnect_attempts > max_reconnects {
                    error!(
                        attempts = reconnect_attempts,
                        "Max reconnect attempts reached, terminating MQTT session"
                    );
                    return;
                }
                warn!(
                    attempt = reconnect_attempts,
                    error = %e,
                    "MQTT connection lost, retrying"
                );
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
}

/// Decode one inbound publish into a [`DeviceEvent`].
///
/// Classification is first-substring-match on the topic in the order
/// telemetry, status, alerts, discovery. Malformed JSON, missing fields
/// and unclassifiable topics yield `None` with a log line; they are never
/// fatal.
#[must_use]
pub fn decode_publish(topic: &str, payload: &[u8]) -> Option<DeviceEvent> {
    let kind = topics::classify(topic)?;

    let value: serde_json::Value = match serde_json::from_slice(payload) {
        Ok(value) => value,
        Err(e) => {
            warn!(topic = %topic, error = %e, "Dropping undecodable payload");
            return None;
        }
    };

    let device_id = topics::device_id(topic);

    match kind {
        TopicKind::Telemetry => match serde_json::from_value::<TelemetryPayload>(value) {
            Ok(telemetry) => Some(DeviceEvent::telemetry(device_id, telemetry)),
            Err(e) => {
                warn!(topic = %topic, error = %e, "Dropping malformed telemetry");
                None
            }
        },
        TopicKind::Status => match serde_json::from_value::<StatusPayload>(value) {
            Ok(status) => Some(DeviceEvent::status(device_id, status.status)),
            Err(e) => {
                warn!(topic = %topic, error = %e, "Dropping malformed status");
                None
            }
        },
        TopicKind::Alert => match serde_json::from_value::<AlertPayload>(value) {
            Ok(alert) => Some(DeviceEvent::alert(device_id, alert)),
            Err(e) => {
                warn!(topic = %topic, error = %e, "Dropping malformed alert");
                None
            }
        },
        TopicKind::Discovery => {
            // Discovery arrives on the system channel; the announcement
            // itself names the device.
            let device_id = value
                .get("deviceId")
                .and_then(|id| id.as_str())
                .map(str::to_string)
                .unwrap_or(device_id);
            Some(DeviceEvent::discovery(device_id, value))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use plenum_core::EventKind;
    use serde_json::json;

    fn telemetry_bytes() -> Vec<u8> {
        json!({
            "sensors": {"temperature": 21.5, "humidity": 48.0, "pressure": 101300.0},
            "battery": 92.0
        })
        .to_string()
        .into_bytes()
    }

    #[test]
    fn test_decode_telemetry() {
        let event = decode_publish("hvac/devices/device-1/telemetry", &telemetry_bytes()).unwrap();
        assert_eq!(event.kind(), EventKind::Telemetry);
        assert_eq!(event.device_id, "device-1");
    }

    #[test]
    fn test_decode_telemetry_wins_tie_break() {
        // Topic also contains `alerts` later in the path; telemetry is
        // checked first and must win.
        let event =
            decode_publish("hvac/devices/d1/telemetry/alerts", &telemetry_bytes()).unwrap();
        assert_eq!(event.kind(), EventKind::Telemetry);
        assert_eq!(event.device_id, "d1");
    }

    #[test]
    fn test_decode_status() {
        let payload = json!({"status": "maintenance"}).to_string();
        let event = decode_publish("hvac/devices/d2/status", payload.as_bytes()).unwrap();
        assert_eq!(event.kind(), EventKind::Status);
        assert_eq!(event.device_id, "d2");
    }

    #[test]
    fn test_decode_alert() {
        let payload = json!({
            "severity": "critical",
            "message": "compressor overheating",
            "type": "high_temperature"
        })
        .to_string();
        let event = decode_publish("hvac/devices/d3/alerts", payload.as_bytes()).unwrap();
        assert_eq!(event.kind(), EventKind::Alert);
    }

    #[test]
    fn test_decode_discovery_takes_payload_device_id() {
        let payload = json!({"deviceId": "device-9", "roomId": "room-3"}).to_string();
        let event = decode_publish("hvac/system/discovery", payload.as_bytes()).unwrap();
        assert_eq!(event.kind(), EventKind::Discovery);
        assert_eq!(event.device_id, "device-9");
    }

    #[test]
    fn test_decode_discovery_without_device_id() {
        let payload = json!({"vendor": "acme"}).to_string();
        let event = decode_publish("hvac/system/discovery", payload.as_bytes()).unwrap();
        assert_eq!(event.device_id, "unknown");
    }

    #[test]
    fn test_malformed_json_produces_no_event() {
        assert!(decode_publish("hvac/devices/d1/telemetry", b"{not json").is_none());
        assert!(decode_publish("hvac/devices/d1/status", b"").is_none());
    }

    #[test]
    fn test_missing_fields_produce_no_event() {
        // Valid JSON, wrong shape.
        let payload = json!({"battery": 50.0}).to_string();
        assert!(decode_publish("hvac/devices/d1/telemetry", payload.as_bytes()).is_none());
    }

    #[test]
    fn test_unclassifiable_topic_produces_no_event() {
        assert!(decode_publish("hvac/devices/d1/commands", &telemetry_bytes()).is_none());
    }

    #[test]
    fn test_command_payload_injects_timestamp() {
        let payload = command_payload(&Command::vent_control(50, None));

        assert_eq!(payload["type"], "vent_control");
        assert_eq!(payload["position"], 50);
        assert!(payload["timestamp"].is_u64());
        assert!(payload["id"].as_str().unwrap().starts_with("cmd-"));
    }

    #[test]
    fn test_default_config() {
        let config = MqttConfig::default();
        assert_eq!(config.port, 1883);
        assert_eq!(config.max_reconnect_attempts, 10);
        assert_eq!(config.connect_timeout_ms, 30_000);
    }

    #[test]
    fn test_clean_disconnect_ends_the_session() {
        // Only the outgoing DISCONNECT stops the loop; other outgoing
        // traffic and incoming packets keep it polling so the enqueued
        // offline status still drains to the wire.
        assert!(is_clean_disconnect(&Event::Outgoing(Outgoing::Disconnect)));
        assert!(!is_clean_disconnect(&Event::Outgoing(Outgoing::PingReq)));
        assert!(!is_clean_disconnect(&Event::Incoming(Packet::PingResp)));
    }
}
