//! Routing event handler.
//!
//! Translates routing-layer events into peer registry and connection manager
//! operations. Holds the node weakly, so a router that outlives its node
//! delivers events into nothing.

use std::rc::{Rc, Weak};

use corelib::{BoxedLink, NodeId, RoutingEventSink};

use crate::local_node::NodeCore;
use crate::telemetry;

pub(crate) struct NodeEvents {
    core: Weak<NodeCore>,
}

impl NodeEvents {
    pub(crate) fn new(core: Weak<NodeCore>) -> Self {
        Self { core }
    }

    fn core(&self) -> Option<Rc<NodeCore>> {
        self.core.upgrade()
    }
}

impl RoutingEventSink for NodeEvents {
    fn node_found(&self, node: NodeId) {
        if let Some(core) = self.core() {
            core.on_node_found(node);
        }
    }

    fn node_lost(&self, node: NodeId) {
        if let Some(core) = self.core() {
            core.on_node_lost(node);
        }
    }

    fn route_improved(&self, node: NodeId) {
        if let Some(core) = self.core() {
            core.on_route_improved(node);
        }
    }

    fn incoming_connection(&self, node: NodeId, link: BoxedLink) {
        match self.core() {
            Some(core) => core.on_incoming_connection(node, link),
            None => tracing::debug!(%node, "node dropped, discarding incoming raw link"),
        }
    }
}

impl NodeCore {
    pub(crate) fn on_node_found(&self, node: NodeId) {
        let (peer, listener) = {
            let mut state = self.state.borrow_mut();
            if !state.running {
                return;
            }
            match state.peers.discover(node) {
                Some(peer) => (peer, state.listener.clone()),
                None => {
                    tracing::trace!(%node, "node already known");
                    return;
                }
            }
        };
        telemetry::peer_discovered();
        tracing::info!(%node, "peer discovered");
        if let Some(listener) = listener {
            listener.peer_discovered(&peer);
        }
    }

    /// Detach the peer for `node`. Its connections are left alone; they stay
    /// in the registry and can be reattached by a later handshake.
    pub(crate) fn on_node_lost(&self, node: NodeId) {
        let (peer, listener) = {
            let mut state = self.state.borrow_mut();
            if !state.running {
                return;
            }
            match state.peers.remove(node) {
                Some(peer) => (peer, state.listener.clone()),
                None => return,
            }
        };
        telemetry::peer_lost();
        tracing::info!(%node, connections = peer.connection_count(), "peer lost");
        if let Some(listener) = listener {
            listener.peer_removed(&peer);
        }
    }
}
