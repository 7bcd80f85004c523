//! Error types for the core library.

use crate::frame::FrameError;
use crate::handshake::HandshakeError;
use crate::network::RoutingError;

/// Result type alias for the core library.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the core library.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Raw link framing failed
    #[error(transparent)]
    Frame(#[from] FrameError),
    /// Handshake could not be written or read
    #[error(transparent)]
    Handshake(#[from] HandshakeError),
    /// Routing layer could not open a link
    #[error(transparent)]
    Routing(#[from] RoutingError),
}
