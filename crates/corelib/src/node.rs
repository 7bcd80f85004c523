//! Node identity as assigned by the routing layer.
//!
//! A `NodeId` names a reachable remote endpoint. It is cheap to compare,
//! hash and copy, so registries key on it directly.

use std::collections::BTreeSet;
use std::fmt;

/// Compact identifier for a node reachable through the routing layer.
///
/// Newtype over `u128`; the routing layer decides how values are assigned,
/// this crate only relies on equality and hashing.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeId(pub u128);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:032x}", self.0)
    }
}

impl From<u128> for NodeId {
    fn from(value: u128) -> Self {
        NodeId(value)
    }
}

/// Destination set of a multicast connection.
///
/// Ordered so logs and test assertions are deterministic.
pub type NodeSet = BTreeSet<NodeId>;

/// Render a destination set as `{a, b, ...}` using short node ids.
pub fn display_nodes(nodes: &NodeSet) -> String {
    let parts: Vec<String> = nodes.iter().map(|n| format!("{:x}", n.0)).collect();
    format!("{{{}}}", parts.join(", "))
}
