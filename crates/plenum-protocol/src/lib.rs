//! # plenum-protocol
//!
//! Wire definitions for the Plenum telemetry relay.
//!
//! This crate defines both sides of the relay's external surface:
//!
//! - **MQTT side** - the topic namespace devices publish into, topic
//!   classification, and the JSON payload shapes devices produce
//!   ([`topics`], [`payload`])
//! - **WebSocket side** - the JSON messages exchanged with real-time
//!   subscribers ([`messages`])
//!
//! ## Example
//!
//! ```rust
//! use plenum_protocol::topics::{self, TopicKind};
//!
//! let kind = topics::classify("hvac/devices/device-1/telemetry");
//! assert_eq!(kind, Some(TopicKind::Telemetry));
//! assert_eq!(topics::device_id("hvac/devices/device-1/telemetry"), "device-1");
//! ```

pub mod messages;
pub mod payload;
pub mod topics;

pub use messages::{ClientMessage, MessageType, ServerMessage};
pub use payload::{AlertPayload, AlertSeverity, DeviceStatus, TelemetryPayload};
pub use topics::TopicKind;

use std::time::{SystemTime, UNIX_EPOCH};

/// Current unix timestamp in milliseconds.
///
/// All wire timestamps (event creation, command injection, server status)
/// use this clock.
#[must_use]
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
