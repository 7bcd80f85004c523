//! Remote peers.
//!
//! A [`RemotePeer`] is the application-facing handle for a routing-layer
//! node. It knows the logical connections the node is a destination of and
//! may carry its own incoming-connection handler, consulted before the local
//! node's global one.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::fmt;
use std::rc::{Rc, Weak};

use corelib::{ConnectionId, NodeId};

use crate::connection::PacketConnection;

/// Receives connections a remote node opened toward us.
pub trait ConnectionHandler {
    fn on_connection(&self, connection: PacketConnection);
}

impl<F> ConnectionHandler for F
where
    F: Fn(PacketConnection),
{
    fn on_connection(&self, connection: PacketConnection) {
        self(connection)
    }
}

struct PeerInner {
    node: NodeId,
    connections: RefCell<HashMap<ConnectionId, PacketConnection>>,
    handler: RefCell<Option<Rc<dyn ConnectionHandler>>>,
    announced: Cell<bool>,
    detached: Cell<bool>,
}

/// Handle to a remote node known to the local node.
#[derive(Clone)]
pub struct RemotePeer {
    inner: Rc<PeerInner>,
}

/// Non-owning reference held by connections back to their peers.
#[derive(Clone)]
pub(crate) struct WeakRemotePeer(Weak<PeerInner>);

impl WeakRemotePeer {
    pub(crate) fn upgrade(&self) -> Option<RemotePeer> {
        self.0.upgrade().map(|inner| RemotePeer { inner })
    }
}

impl RemotePeer {
    pub(crate) fn new(node: NodeId) -> Self {
        Self {
            inner: Rc::new(PeerInner {
                node,
                connections: RefCell::new(HashMap::new()),
                handler: RefCell::new(None),
                announced: Cell::new(false),
                detached: Cell::new(false),
            }),
        }
    }

    pub fn node(&self) -> NodeId {
        self.inner.node
    }

    /// Whether two handles refer to the same peer object.
    pub fn ptr_eq(a: &Self, b: &Self) -> bool {
        Rc::ptr_eq(&a.inner, &b.inner)
    }

    /// False once the routing layer reported the node lost.
    pub fn is_reachable(&self) -> bool {
        !self.inner.detached.get()
    }

    /// Handle connections this node opens toward us.
    pub fn set_connection_handler(&self, handler: impl ConnectionHandler + 'static) {
        *self.inner.handler.borrow_mut() = Some(Rc::new(handler));
    }

    pub fn clear_connection_handler(&self) {
        self.inner.handler.borrow_mut().take();
    }

    pub fn has_connection_handler(&self) -> bool {
        self.inner.handler.borrow().is_some()
    }

    pub fn connection(&self, id: &ConnectionId) -> Option<PacketConnection> {
        self.inner.connections.borrow().get(id).cloned()
    }

    /// Logical connections this node is a destination of.
    pub fn connections(&self) -> Vec<PacketConnection> {
        self.inner.connections.borrow().values().cloned().collect()
    }

    pub fn connection_count(&self) -> usize {
        self.inner.connections.borrow().len()
    }

    pub(crate) fn connection_handler(&self) -> Option<Rc<dyn ConnectionHandler>> {
        self.inner.handler.borrow().clone()
    }

    pub(crate) fn attach(&self, connection: &PacketConnection) {
        let previous = self
            .inner
            .connections
            .borrow_mut()
            .insert(connection.id(), connection.clone());
        if previous.is_none() {
            connection.note_peer(self.downgrade());
        }
    }

    pub(crate) fn detach_connection(&self, id: &ConnectionId) {
        self.inner.connections.borrow_mut().remove(id);
    }

    /// Returns true exactly once: the first time the node is announced.
    pub(crate) fn mark_announced(&self) -> bool {
        !self.inner.announced.replace(true)
    }

    /// Make the next discovery announce this peer again.
    pub(crate) fn reset_announced(&self) {
        self.inner.announced.set(false);
    }

    /// Called when the node is lost. Late dispatch must find no handler.
    pub(crate) fn detach(&self) {
        self.inner.detached.set(true);
        self.clear_connection_handler();
    }

    pub(crate) fn downgrade(&self) -> WeakRemotePeer {
        WeakRemotePeer(Rc::downgrade(&self.inner))
    }
}

impl fmt::Debug for RemotePeer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemotePeer")
            .field("node", &self.inner.node)
            .field("connections", &self.connection_count())
            .field("reachable", &self.is_reachable())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Direction;
    use corelib::DEFAULT_MAX_FRAME_SIZE;

    fn connection_to(node: NodeId) -> PacketConnection {
        PacketConnection::new(
            ConnectionId::random(),
            [node].into_iter().collect(),
            Direction::Established,
            DEFAULT_MAX_FRAME_SIZE,
            None,
        )
    }

    #[test]
    fn test_announce_only_once() {
        let peer = RemotePeer::new(NodeId(1));
        assert!(peer.mark_announced());
        assert!(!peer.mark_announced());
    }

    #[test]
    fn test_detach_clears_handler() {
        let peer = RemotePeer::new(NodeId(1));
        peer.set_connection_handler(|_conn: PacketConnection| {});
        assert!(peer.has_connection_handler());
        peer.detach();
        assert!(!peer.has_connection_handler());
        assert!(!peer.is_reachable());
    }

    #[test]
    fn test_close_detaches_from_peer() {
        let peer = RemotePeer::new(NodeId(1));
        let conn = connection_to(NodeId(1));
        peer.attach(&conn);
        peer.attach(&conn);
        assert_eq!(peer.connection_count(), 1);

        conn.close();
        assert_eq!(peer.connection_count(), 0);
        assert!(peer.connection(&conn.id()).is_none());
    }
}
