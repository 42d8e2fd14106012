//! # plenum-core
//!
//! Device event model and connection registry for the Plenum telemetry
//! relay.
//!
//! This crate provides the relay's concurrent heart:
//!
//! - **DeviceEvent** - the normalized unit the ingest side produces
//! - **Registry** - subscriber connections, room interest sets,
//!   interest-scoped fan-out and liveness sweeping
//! - **DeviceDirectory** - device→room mapping used to scope deliveries
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │   Ingest    │────▶│ DeviceEvent │────▶│  Registry   │
//! └─────────────┘     └─────────────┘     └─────────────┘
//!                            │                   │
//!                            ▼                   ▼
//!                     ┌─────────────┐     ┌─────────────┐
//!                     │  Directory  │     │ Subscribers │
//!                     └─────────────┘     └─────────────┘
//! ```

pub mod directory;
pub mod event;
pub mod registry;

pub use directory::DeviceDirectory;
pub use event::{DeviceEvent, EventKind};
pub use registry::{ClientId, Outbound, Registry, RegistryError, RegistryStats};
