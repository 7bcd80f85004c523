//! Peer registry.
//!
//! Maps routing-layer node identities to [`RemotePeer`] handles. `provide`
//! is the only way a peer comes into existence; `remove` detaches it so the
//! next `provide` for the same node starts from an empty peer.

use std::collections::HashMap;

use corelib::NodeId;

use crate::peer::RemotePeer;

#[derive(Default)]
pub struct PeerRegistry {
    peers: HashMap<NodeId, RemotePeer>,
}

impl PeerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// The registered peer for `node`, created on first reference.
    pub fn provide(&mut self, node: NodeId) -> RemotePeer {
        self.peers
            .entry(node)
            .or_insert_with(|| {
                tracing::debug!(%node, "peer created");
                RemotePeer::new(node)
            })
            .clone()
    }

    /// Provide the peer and report whether the discovery notification is due.
    ///
    /// Returns `Some` only the first time the current peer object for `node`
    /// is announced; repeated discovery of a registered node is silent.
    pub fn discover(&mut self, node: NodeId) -> Option<RemotePeer> {
        let peer = self.provide(node);
        peer.mark_announced().then_some(peer)
    }

    /// Detach the peer for `node`, clearing its handler.
    pub fn remove(&mut self, node: NodeId) -> Option<RemotePeer> {
        let peer = self.peers.remove(&node)?;
        peer.detach();
        tracing::debug!(%node, "peer detached");
        Some(peer)
    }

    /// Forget which peers were announced. Used on stop, so a listener
    /// installed by the next start hears about every node again.
    pub fn reset_announcements(&mut self) {
        for peer in self.peers.values() {
            peer.reset_announced();
        }
    }

    pub fn get(&self, node: NodeId) -> Option<RemotePeer> {
        self.peers.get(&node).cloned()
    }

    pub fn contains(&self, node: NodeId) -> bool {
        self.peers.contains_key(&node)
    }

    pub fn nodes(&self) -> Vec<NodeId> {
        let mut nodes: Vec<NodeId> = self.peers.keys().copied().collect();
        nodes.sort();
        nodes
    }

    pub fn peers(&self) -> Vec<RemotePeer> {
        self.nodes()
            .into_iter()
            .filter_map(|node| self.get(node))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_provide_returns_same_peer() {
        let mut registry = PeerRegistry::new();
        let a = registry.provide(NodeId(1));
        let b = registry.provide(NodeId(1));
        assert!(RemotePeer::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_discover_fires_once() {
        let mut registry = PeerRegistry::new();
        assert!(registry.discover(NodeId(1)).is_some());
        assert!(registry.discover(NodeId(1)).is_none());
    }

    #[test]
    fn test_provide_then_discover_still_announces_once() {
        // A peer created through handshake resolution is announced by the
        // caller of `discover`, not by `provide`.
        let mut registry = PeerRegistry::new();
        registry.provide(NodeId(1));
        assert!(registry.discover(NodeId(1)).is_some());
        assert!(registry.discover(NodeId(1)).is_none());
    }

    #[test]
    fn test_remove_then_provide_creates_fresh_peer() {
        let mut registry = PeerRegistry::new();
        let old = registry.provide(NodeId(1));
        old.set_connection_handler(|_conn: crate::PacketConnection| {});

        let removed = registry.remove(NodeId(1)).unwrap();
        assert!(RemotePeer::ptr_eq(&old, &removed));
        assert!(!old.has_connection_handler());
        assert!(!registry.contains(NodeId(1)));

        let fresh = registry.provide(NodeId(1));
        assert!(!RemotePeer::ptr_eq(&old, &fresh));
        assert_eq!(fresh.connection_count(), 0);
        assert!(registry.discover(NodeId(1)).is_some());
    }

    #[test]
    fn test_reset_announcements_keeps_peers() {
        let mut registry = PeerRegistry::new();
        let peer = registry.discover(NodeId(1)).unwrap();
        registry.reset_announcements();
        let again = registry.discover(NodeId(1)).unwrap();
        assert!(RemotePeer::ptr_eq(&peer, &again));
        assert!(registry.discover(NodeId(1)).is_none());
    }

    #[test]
    fn test_remove_unknown_node() {
        let mut registry = PeerRegistry::new();
        assert!(registry.remove(NodeId(9)).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn test_nodes_sorted() {
        let mut registry = PeerRegistry::new();
        registry.provide(NodeId(3));
        registry.provide(NodeId(1));
        assert_eq!(registry.nodes(), vec![NodeId(1), NodeId(3)]);
    }
}
