//! Error types for the local node.
//!
//! Only misuse of the API is reported here. Routing failures, handshake
//! failures and missing handlers are logged where they happen and never
//! surface to the application.

use corelib::{ConnectionId, FrameError};
use thiserror::Error;

/// Result type alias for local node operations.
pub type Result<T> = std::result::Result<T, MeshError>;

/// Errors returned by the local node and its connections.
#[derive(Error, Debug)]
pub enum MeshError {
    /// Operation requires a started node
    #[error("local node is not running")]
    NotRunning,

    /// `start` called twice without `stop`
    #[error("local node is already running")]
    AlreadyRunning,

    /// `connect` called with an empty destination set
    #[error("a connection needs at least one destination")]
    NoDestinations,

    /// Identifier already maps to a live connection
    #[error("connection {0} is already registered")]
    DuplicateConnection(ConnectionId),

    /// No raw link is bound to the connection yet
    #[error("connection {0} has no bound link")]
    NotActive(ConnectionId),

    /// Connection was closed
    #[error("connection {0} is closed")]
    Closed(ConnectionId),

    /// Only the side that created a connection can re-establish its link
    #[error("connection {0} was accepted; only its initiator can re-establish it")]
    NotInitiator(ConnectionId),

    /// Identifier is not known to this node
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),

    /// Link I/O failed
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Configuration rejected
    #[error("invalid configuration: {0}")]
    Config(String),
}
