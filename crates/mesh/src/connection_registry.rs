//! Connection registry.
//!
//! Tracks the logical connections the local node established and the ones it
//! accepted, keyed by identifier. Route changes scan the established side;
//! close removes from both.
//!
//! # Invariants
//!
//! - An identifier is present in at most one of the two maps
//! - A connection sits in the map matching its [`Direction`]

use std::collections::HashMap;

use corelib::{ConnectionId, NodeId};

use crate::connection::{Direction, PacketConnection};
use crate::error::{MeshError, Result};

#[derive(Default)]
pub struct ConnectionRegistry {
    established: HashMap<ConnectionId, PacketConnection>,
    incoming: HashMap<ConnectionId, PacketConnection>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a connection under its direction.
    ///
    /// # Errors
    ///
    /// Returns `DuplicateConnection` if the identifier is already live.
    pub fn insert(&mut self, connection: PacketConnection) -> Result<()> {
        let id = connection.id();
        if self.contains(&id) {
            return Err(MeshError::DuplicateConnection(id));
        }
        match connection.direction() {
            Direction::Established => self.established.insert(id, connection),
            Direction::Incoming => self.incoming.insert(id, connection),
        };
        Ok(())
    }

    /// Remove an identifier from both maps.
    pub fn remove(&mut self, id: &ConnectionId) -> Option<PacketConnection> {
        let established = self.established.remove(id);
        let incoming = self.incoming.remove(id);
        established.or(incoming)
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.established.contains_key(id) || self.incoming.contains_key(id)
    }

    pub fn get(&self, id: &ConnectionId) -> Option<&PacketConnection> {
        self.established.get(id).or_else(|| self.incoming.get(id))
    }

    /// Established connections whose destination set contains `node`.
    pub fn established_toward(&self, node: NodeId) -> Vec<PacketConnection> {
        self.established
            .values()
            .filter(|conn| conn.includes(node))
            .cloned()
            .collect()
    }

    pub fn established_len(&self) -> usize {
        self.established.len()
    }

    pub fn incoming_len(&self) -> usize {
        self.incoming.len()
    }

    pub fn len(&self) -> usize {
        self.established.len() + self.incoming.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
