//! Contracts with the routing/transport collaborator.
//!
//! The routing layer discovers nodes, opens raw links toward destination
//! sets, and reports what it sees through a [`RoutingEventSink`]. This crate
//! never implements discovery itself; it only defines the seam.
//!
//! Everything here is single-threaded: a local node and its router share one
//! serialization context, so the traits are not `Send` and the async methods
//! use `async_trait(?Send)`.

use std::fmt;
use std::rc::Rc;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::node::{display_nodes, NodeId, NodeSet};

/// A raw duplex byte connection supplied by the routing layer.
pub trait RawLink: AsyncRead + AsyncWrite + Unpin + 'static {}

impl<T> RawLink for T where T: AsyncRead + AsyncWrite + Unpin + 'static {}

impl fmt::Debug for dyn RawLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RawLink")
    }
}

/// Owned, type-erased raw link.
pub type BoxedLink = Box<dyn RawLink>;

/// Reasons the routing layer refuses or fails to open a raw link.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RoutingError {
    /// No route to one or more destinations.
    #[error("no route to {}", display_nodes(.0))]
    Unreachable(NodeSet),

    /// The routing layer rejected the request.
    #[error("establishment rejected: {0}")]
    Rejected(String),

    /// The routing layer is not running.
    #[error("routing layer stopped")]
    Stopped,
}

/// Event surface the routing layer drives.
///
/// Implemented by the local node. Calls must arrive on the node's
/// serialization context, in the order the routing layer observed them.
pub trait RoutingEventSink {
    /// A node became reachable.
    fn node_found(&self, node: NodeId);

    /// A node is no longer reachable.
    fn node_lost(&self, node: NodeId);

    /// A better (or restored) path to `node` exists.
    fn route_improved(&self, node: NodeId);

    /// `node` opened a raw link to us. The first bytes on it are a handshake.
    fn incoming_connection(&self, node: NodeId, link: BoxedLink);
}

/// Pluggable transport module, passed through to the routing layer untouched.
pub trait TransportModule {
    /// Stable name used to remove the module again.
    fn name(&self) -> &str;
}

impl fmt::Debug for dyn TransportModule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TransportModule({})", self.name())
    }
}

/// The routing/transport collaborator.
#[async_trait(?Send)]
pub trait Router {
    /// Begin routing and deliver events to `sink`. Idempotent.
    fn start(&self, sink: Rc<dyn RoutingEventSink>);

    /// Stop routing and drop the sink. Idempotent.
    fn stop(&self);

    /// Open one raw link reaching every node in `destinations`.
    ///
    /// Resolves exactly once.
    async fn establish_multicast(&self, destinations: &NodeSet) -> Result<BoxedLink, RoutingError>;

    /// Register a transport module.
    fn add_module(&self, module: Rc<dyn TransportModule>);

    /// Remove a transport module by name. Returns whether one was removed.
    fn remove_module(&self, name: &str) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unreachable_message_lists_nodes() {
        let nodes: NodeSet = [NodeId(0xa), NodeId(0xb)].into_iter().collect();
        let err = RoutingError::Unreachable(nodes);
        assert_eq!(err.to_string(), "no route to {a, b}");
    }

    #[test]
    fn test_duplex_is_a_raw_link() {
        let (a, _b) = tokio::io::duplex(8);
        let _link: BoxedLink = Box::new(a);
    }
}
