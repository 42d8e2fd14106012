//! Connection registry and fan-out engine.
//!
//! The registry tracks live subscriber connections, their room interest
//! sets and liveness, and delivers outbound messages only to interested
//! connections. It is the relay's sole shared mutable structure; the
//! DashMap serializes concurrent inserts, removals and iteration.
//!
//! Delivery is a non-blocking send on the connection's outbound channel.
//! A failed send means the connection task is gone, so the entry is
//! removed rather than retried.

use dashmap::DashMap;
use plenum_protocol::{now_millis, ServerMessage};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// Unique subscriber connection identifier.
pub type ClientId = String;

/// Registry errors.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Connection is not registered (already removed or never existed).
    #[error("Unknown connection: {0}")]
    UnknownConnection(ClientId),
}

/// Directive delivered to a connection task through its outbound channel.
#[derive(Debug, Clone)]
pub enum Outbound {
    /// A serialized server message to forward to the client.
    Frame(Arc<str>),
    /// Issue a transport-level liveness ping.
    Ping,
    /// Close the connection.
    Close,
}

/// Per-connection registry entry.
///
/// The interest set is written only by that connection's own
/// control-message handler; the fan-out path only reads it.
struct ClientEntry {
    tx: mpsc::UnboundedSender<Outbound>,
    rooms: HashSet<String>,
    /// Reset to false each probe cycle; a pong flips it back.
    alive: bool,
    /// Unix millis of the last probe response.
    last_pong: u64,
    connected_at: u64,
}

impl ClientEntry {
    fn new(tx: mpsc::UnboundedSender<Outbound>) -> Self {
        let now = now_millis();
        Self {
            tx,
            rooms: HashSet::new(),
            alive: true,
            last_pong: now,
            connected_at: now,
        }
    }
}

/// The connection registry and fan-out engine.
pub struct Registry {
    clients: DashMap<ClientId, ClientEntry>,
}

impl Registry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            clients: DashMap::new(),
        }
    }

    /// Register a new connection with an empty interest set.
    ///
    /// Returns the assigned connection id. The caller sends the welcome
    /// message to that id.
    pub fn register(&self, tx: mpsc::UnboundedSender<Outbound>) -> ClientId {
        let id = uuid::Uuid::new_v4().to_string();
        self.clients.insert(id.clone(), ClientEntry::new(tx));
        debug!(client = %id, "Client registered");
        id
    }

    /// Remove a connection. Idempotent.
    pub fn remove(&self, client_id: &str) {
        if self.clients.remove(client_id).is_some() {
            debug!(client = %client_id, "Client removed");
        }
    }

    /// Number of registered connections.
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Add a room to a connection's interest set.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is not registered.
    pub fn subscribe_room(&self, client_id: &str, room_id: &str) -> Result<(), RegistryError> {
        let mut entry = self
            .clients
            .get_mut(client_id)
            .ok_or_else(|| RegistryError::UnknownConnection(client_id.to_string()))?;
        entry.rooms.insert(room_id.to_string());
        debug!(client = %client_id, room = %room_id, "Subscribed to room");
        Ok(())
    }

    /// Remove a room from a connection's interest set.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection is not registered.
    pub fn unsubscribe_room(&self, client_id: &str, room_id: &str) -> Result<(), RegistryError> {
        let mut entry = self
            .clients
            .get_mut(client_id)
            .ok_or_else(|| RegistryError::UnknownConnection(client_id.to_string()))?;
        entry.rooms.remove(room_id);
        debug!(client = %client_id, room = %room_id, "Unsubscribed from room");
        Ok(())
    }

    /// Flip a connection's liveness flag back on (probe response).
    pub fn mark_alive(&self, client_id: &str) {
        if let Some(mut entry) = self.clients.get_mut(client_id) {
            entry.alive = true;
            entry.last_pong = now_millis();
            trace!(client = %client_id, "Liveness confirmed");
        }
    }

    /// Send a message to a single connection.
    ///
    /// Returns `true` if the send succeeded. A failed send removes the
    /// connection from the registry.
    pub fn send_to(&self, client_id: &str, message: &ServerMessage) -> bool {
        let frame: Arc<str> = match serde_json::to_string(message) {
            Ok(json) => json.into(),
            Err(e) => {
                warn!(client = %client_id, error = %e, "Failed to serialize message");
                return false;
            }
        };

        let delivered = match self.clients.get(client_id) {
            Some(entry) => entry.tx.send(Outbound::Frame(frame)).is_ok(),
            None => return false,
        };

        if !delivered {
            warn!(client = %client_id, "Send failed, removing client");
            self.remove(client_id);
        }
        delivered
    }

    /// Deliver a message to every connection interested in the room.
    ///
    /// Connections with no matching interest receive nothing. Delivery
    /// order across connections is unspecified. Returns the number of
    /// recipients.
    pub fn broadcast_room(&self, room_id: &str, message: &ServerMessage) -> usize {
        self.broadcast_filtered(message, |entry| entry.rooms.contains(room_id))
    }

    /// Deliver a message to every registered connection regardless of
    /// interest set. Returns the number of recipients.
    pub fn broadcast_all(&self, message: &ServerMessage) -> usize {
        self.broadcast_filtered(message, |_| true)
    }

    fn broadcast_filtered<F>(&self, message: &ServerMessage, filter: F) -> usize
    where
        F: Fn(&ClientEntry) -> bool,
    {
        let frame: Arc<str> = match serde_json::to_string(message) {
            Ok(json) => json.into(),
            Err(e) => {
                warn!(error = %e, "Failed to serialize broadcast");
                return 0;
            }
        };

        let mut delivered = 0;
        let mut dead: Vec<ClientId> = Vec::new();

        for entry in self.clients.iter() {
            if !filter(entry.value()) {
                continue;
            }
            if entry.tx.send(Outbound::Frame(frame.clone())).is_ok() {
                delivered += 1;
            } else {
                dead.push(entry.key().clone());
            }
        }

        // A failed send is proof of death; evict outside the iteration.
        for id in dead {
            warn!(client = %id, "Send failed during broadcast, removing client");
            self.remove(&id);
        }

        trace!(recipients = delivered, "Broadcast delivered");
        delivered
    }

    /// Run one liveness probe cycle.
    ///
    /// Connections whose flag is still false from the previous cycle are
    /// closed and removed; the rest have their flag reset and receive a
    /// transport-level ping. This is the sole eviction mechanism for
    /// unresponsive clients. Returns the evicted connection ids.
    pub fn sweep(&self) -> Vec<ClientId> {
        let mut dead: Vec<ClientId> = Vec::new();

        for mut entry in self.clients.iter_mut() {
            if !entry.alive {
                dead.push(entry.key().clone());
                continue;
            }
            entry.alive = false;
            if entry.tx.send(Outbound::Ping).is_err() {
                dead.push(entry.key().clone());
            }
        }

        for id in &dead {
            if let Some((_, entry)) = self.clients.remove(id) {
                let _ = entry.tx.send(Outbound::Close);
                debug!(client = %id, "Terminated unresponsive client");
            }
        }

        dead
    }

    /// Snapshot of registry statistics.
    #[must_use]
    pub fn stats(&self) -> RegistryStats {
        let mut clients_by_room: HashMap<String, usize> = HashMap::new();
        let mut clients = Vec::with_capacity(self.clients.len());

        for entry in self.clients.iter() {
            for room in &entry.rooms {
                *clients_by_room.entry(room.clone()).or_insert(0) += 1;
            }
            clients.push(ClientInfo {
                id: entry.key().clone(),
                rooms: entry.rooms.iter().cloned().collect(),
                alive: entry.alive,
                last_pong: entry.last_pong,
                connected_at: entry.connected_at,
            });
        }

        RegistryStats {
            total_clients: clients.len(),
            clients_by_room,
            clients,
        }
    }

    /// Close every connection and clear the registry.
    pub fn shutdown(&self) {
        for entry in self.clients.iter() {
            let _ = entry.tx.send(Outbound::Close);
        }
        self.clients.clear();
        debug!("Registry shut down");
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

/// Registry statistics snapshot.
#[derive(Debug, Clone, Serialize)]
pub struct RegistryStats {
    pub total_clients: usize,
    pub clients_by_room: HashMap<String, usize>,
    pub clients: Vec<ClientInfo>,
}

/// Per-connection diagnostic detail.
#[derive(Debug, Clone, Serialize)]
pub struct ClientInfo {
    pub id: ClientId,
    pub rooms: Vec<String>,
    pub alive: bool,
    pub last_pong: u64,
    pub connected_at: u64,
}
