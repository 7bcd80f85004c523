//! Local node coordination for linkweave.
//!
//! This crate turns raw links supplied by a routing layer into stable logical
//! connections:
//! - Peer registry keyed by routing-layer node
//! - Connection registry for established and incoming connections
//! - Connection manager: establish, accept, swap on route change
//! - Routing event handler wiring the router into the node
//! - In-memory routers for tests and demos

pub mod config;
pub mod connection;
pub mod connection_registry;
pub mod error;
mod events;
pub mod local_node;
mod manager;
pub mod peer;
pub mod peer_registry;
pub mod telemetry;
pub mod testing;

pub use config::{MeshConfig, RouteRefresh};
pub use connection::{ConnectionState, Direction, PacketConnection};
pub use error::{MeshError, Result};
pub use local_node::{LocalNode, PeerCallbacks, PeerListener};
pub use peer::{ConnectionHandler, RemotePeer};
