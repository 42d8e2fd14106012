//! # plenum-ingest
//!
//! Message ingest for the Plenum telemetry relay.
//!
//! Two event sources feed the relay, both emitting [`DeviceEvent`]s onto
//! an unbounded channel consumed by the fan-out bridge:
//!
//! - [`MqttIngest`] - a live broker session: subscribes the device topic
//!   patterns, decodes and classifies inbound publishes, and exposes the
//!   relay's fire-and-forget command publishing
//! - [`Simulator`] - interval-driven synthetic telemetry for development
//!   when no broker is reachable
//!
//! [`DeviceEvent`]: plenum_core::DeviceEvent

pub mod mqtt;
pub mod simulator;

pub use mqtt::{decode_publish, IngestError, MqttConfig, MqttIngest};
pub use simulator::{Simulator, SimulatorConfig, SimulatorError};
