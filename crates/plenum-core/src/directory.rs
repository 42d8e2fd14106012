//! Device→room directory.
//!
//! Room-scoped fan-out needs to know which room a reporting device sits
//! in. The directory is seeded from configuration and updated by
//! discovery announcements that carry a `roomId`.

use dashmap::DashMap;
use tracing::debug;

/// Maps device ids to the room they report for.
#[derive(Debug, Default)]
pub struct DeviceDirectory {
    rooms: DashMap<String, String>,
}

impl DeviceDirectory {
    /// Create an empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the directory from (device, room) pairs.
    pub fn seed<I, S>(&self, assignments: I)
    where
        I: IntoIterator<Item = (S, S)>,
        S: Into<String>,
    {
        for (device, room) in assignments {
            self.rooms.insert(device.into(), room.into());
        }
    }

    /// Assign a device to a room, replacing any previous assignment.
    pub fn assign(&self, device_id: impl Into<String>, room_id: impl Into<String>) {
        let device_id = device_id.into();
        let room_id = room_id.into();
        debug!(device = %device_id, room = %room_id, "Device assigned to room");
        self.rooms.insert(device_id, room_id);
    }

    /// The room a device reports for, if known.
    #[must_use]
    pub fn room_for(&self, device_id: &str) -> Option<String> {
        self.rooms.get(device_id).map(|r| r.clone())
    }

    /// Number of known devices.
    #[must_use]
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    /// Whether the directory is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seed_and_lookup() {
        let directory = DeviceDirectory::new();
        directory.seed([("device-1", "room-1"), ("device-2", "room-2")]);

        assert_eq!(directory.room_for("device-1"), Some("room-1".to_string()));
        assert_eq!(directory.room_for("device-3"), None);
        assert_eq!(directory.len(), 2);
    }

    #[test]
    fn test_assign_replaces() {
        let directory = DeviceDirectory::new();
        directory.assign("device-1", "room-1");
        directory.assign("device-1", "room-9");

        assert_eq!(directory.room_for("device-1"), Some("room-9".to_string()));
    }
}
