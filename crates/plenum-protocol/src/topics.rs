//! MQTT topic model for the device namespace.
//!
//! Devices publish under a fixed root prefix:
//!
//! ```text
//! hvac/devices/{deviceId}/telemetry
//! hvac/devices/{deviceId}/status
//! hvac/devices/{deviceId}/alerts
//! hvac/system/discovery
//! ```
//!
//! The relay publishes commands to `hvac/devices/{deviceId}/commands` and
//! its own retained status to `hvac/server/status`.

/// Root prefix for all relay topics.
pub const ROOT: &str = "hvac";

/// Retained server status topic (also the last-will topic).
pub const SERVER_STATUS_TOPIC: &str = "hvac/server/status";

/// Broadcast pseudo-device for fleet-wide commands.
pub const BROADCAST_DEVICE: &str = "broadcast";

/// The four subscription patterns the ingest session registers.
pub const SUBSCRIPTION_PATTERNS: [&str; 4] = [
    "hvac/devices/+/telemetry",
    "hvac/devices/+/status",
    "hvac/devices/+/alerts",
    "hvac/system/discovery",
];

/// Classification of an inbound topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TopicKind {
    Telemetry,
    Status,
    Alert,
    Discovery,
}

/// Classify a topic by substring match.
///
/// Matching is first-match-wins in the order telemetry, status, alerts,
/// discovery. The order is a contract: a topic containing both `telemetry`
/// and `alerts` classifies as telemetry, and downstream fan-out depends on
/// that tie-break.
#[must_use]
pub fn classify(topic: &str) -> Option<TopicKind> {
    if topic.contains("telemetry") {
        Some(TopicKind::Telemetry)
    } else if topic.contains("status") {
        Some(TopicKind::Status)
    } else if topic.contains("alerts") {
        Some(TopicKind::Alert)
    } else if topic.contains("discovery") {
        Some(TopicKind::Discovery)
    } else {
        None
    }
}

/// Extract the device id from a topic path.
///
/// The id is the segment immediately following the literal `devices`
/// segment; `"unknown"` when there is no such segment.
#[must_use]
pub fn device_id(topic: &str) -> String {
    let mut parts = topic.split('/');
    while let Some(part) = parts.next() {
        if part == "devices" {
            return parts.next().unwrap_or("unknown").to_string();
        }
    }
    "unknown".to_string()
}

/// Command topic for a device.
#[must_use]
pub fn command_topic(device_id: &str) -> String {
    format!("{ROOT}/devices/{device_id}/commands")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_priority_order() {
        assert_eq!(
            classify("hvac/devices/d1/telemetry"),
            Some(TopicKind::Telemetry)
        );
        assert_eq!(classify("hvac/devices/d1/status"), Some(TopicKind::Status));
        assert_eq!(classify("hvac/devices/d1/alerts"), Some(TopicKind::Alert));
        assert_eq!(
            classify("hvac/system/discovery"),
            Some(TopicKind::Discovery)
        );

        // First-match tie-break: telemetry wins over a later alerts segment.
        assert_eq!(
            classify("hvac/devices/d1/telemetry/alerts"),
            Some(TopicKind::Telemetry)
        );

        assert_eq!(classify("hvac/devices/d1/commands"), None);
    }

    #[test]
    fn test_device_id_extraction() {
        assert_eq!(device_id("hvac/devices/device-1/telemetry"), "device-1");
        assert_eq!(device_id("hvac/devices/abc123/alerts"), "abc123");
    }

    #[test]
    fn test_device_id_missing_segment() {
        // No segment after `devices` yields the sentinel.
        assert_eq!(device_id("hvac/devices"), "unknown");
        // No `devices` segment at all.
        assert_eq!(device_id("hvac/system/discovery"), "unknown");
    }

    #[test]
    fn test_command_topic() {
        assert_eq!(command_topic("d1"), "hvac/devices/d1/commands");
    }
}
