//! Core library for the linkweave coordination layer.
//!
//! This crate provides the leaf abstractions the local node is built on:
//! - Node identity and destination sets
//! - Connection identifiers
//! - Length framing for raw links
//! - The one-packet handshake codec
//! - Contracts with the routing/transport collaborator

pub mod connection_id;
pub mod error;
pub mod frame;
pub mod handshake;
pub mod network;
pub mod node;

pub use connection_id::{ConnectionId, CONNECTION_ID_LEN};
pub use error::{Error, Result};
pub use frame::{FrameError, DEFAULT_MAX_FRAME_SIZE};
pub use handshake::{read_handshake, write_handshake, HandshakeError};
pub use network::{BoxedLink, RawLink, Router, RoutingError, RoutingEventSink, TransportModule};
pub use node::{NodeId, NodeSet};
