//! Connection identifiers.
//!
//! The initiator of a logical connection draws a random 16 byte token. It is
//! the only key correlating a logical connection with whichever raw link
//! currently backs it, and it is the entire body of the handshake packet.

use std::fmt;

use rand::RngCore;
use serde::{Deserialize, Serialize};

/// Size in bytes of an encoded connection identifier.
pub const CONNECTION_ID_LEN: usize = 16;

/// Random token identifying a logical connection.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ConnectionId([u8; CONNECTION_ID_LEN]);

impl ConnectionId {
    /// Draw a fresh identifier from the thread-local CSPRNG.
    pub fn random() -> Self {
        let mut bytes = [0u8; CONNECTION_ID_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Build an identifier from raw bytes (tests and decoding).
    pub const fn from_bytes(bytes: [u8; CONNECTION_ID_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; CONNECTION_ID_LEN] {
        &self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in &self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ConnectionId({})", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_is_hex() {
        let id = ConnectionId::from_bytes([0xab; CONNECTION_ID_LEN]);
        assert_eq!(id.to_string(), "ab".repeat(CONNECTION_ID_LEN));
    }

    #[test]
    fn test_random_ids_differ() {
        assert_ne!(ConnectionId::random(), ConnectionId::random());
    }
}
