//! Handshake codec.
//!
//! The side that opens a raw link writes exactly one handshake packet before
//! anything else; the receiving side reads exactly one before interpreting any
//! other traffic. The packet is a single frame (see [`crate::frame`]) whose
//! body is the [`ConnectionId`] and nothing else: no version byte, no
//! extension fields.
//!
//! Packet format: `[length:4 = 16][connection id:16]`
//!
//! Every failure here is local and non-fatal. Callers drop the raw link and
//! skip connection resolution.

use std::time::Duration;

use bincode::Options;
use tokio::io::{AsyncRead, AsyncWrite};

use crate::connection_id::{ConnectionId, CONNECTION_ID_LEN};
use crate::frame::{read_frame, write_frame, FrameError};

/// Exact size of a handshake frame on the wire.
pub const HANDSHAKE_PACKET_SIZE: usize = crate::frame::LENGTH_PREFIX_SIZE + CONNECTION_ID_LEN;

/// Handshake failures.
#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    /// Framing failed: link closed early, oversized announcement, or I/O.
    #[error("handshake framing failed: {0}")]
    Frame(#[from] FrameError),

    /// A frame arrived but its body is not a connection identifier.
    #[error("malformed handshake body ({len} bytes)")]
    Malformed {
        /// Body length received.
        len: usize,
    },

    /// Encoding the identifier failed.
    #[error("handshake encoding failed: {0}")]
    Encode(#[from] bincode::Error),

    /// No handshake arrived within the configured timeout.
    #[error("no handshake received within {after:?}")]
    TimedOut {
        /// Timeout that elapsed.
        after: Duration,
    },
}

fn codec() -> impl Options {
    bincode::DefaultOptions::new()
        .with_fixint_encoding()
        .reject_trailing_bytes()
}

/// Encode the handshake body for `id`.
pub fn encode(id: &ConnectionId) -> Result<Vec<u8>, HandshakeError> {
    Ok(codec().serialize(id)?)
}

/// Decode a handshake body. Anything but exactly one identifier is malformed.
pub fn decode(body: &[u8]) -> Result<ConnectionId, HandshakeError> {
    if body.len() != CONNECTION_ID_LEN {
        return Err(HandshakeError::Malformed { len: body.len() });
    }
    codec()
        .deserialize(body)
        .map_err(|_| HandshakeError::Malformed { len: body.len() })
}

/// Send the handshake packet identifying `id` on a freshly opened link.
pub async fn write_handshake<W>(link: &mut W, id: &ConnectionId) -> Result<(), HandshakeError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let body = encode(id)?;
    write_frame(link, &body, CONNECTION_ID_LEN).await?;
    Ok(())
}

/// Read the handshake packet from a freshly accepted link.
///
/// With `timeout` set, a peer that stays silent is treated like one that
/// closed the link.
pub async fn read_handshake<R>(
    link: &mut R,
    timeout: Option<Duration>,
) -> Result<ConnectionId, HandshakeError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let body = match timeout {
        Some(after) => tokio::time::timeout(after, read_frame(link, CONNECTION_ID_LEN))
            .await
            .map_err(|_| HandshakeError::TimedOut { after })??,
        None => read_frame(link, CONNECTION_ID_LEN).await?,
    };
    decode(&body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncWriteExt;

    #[test]
    fn test_encoded_body_is_raw_identifier() {
        let id = ConnectionId::from_bytes([7; CONNECTION_ID_LEN]);
        let body = encode(&id).unwrap();
        assert_eq!(body, vec![7; CONNECTION_ID_LEN]);
    }

    #[test]
    fn test_decode_rejects_short_and_long_bodies() {
        assert!(matches!(
            decode(&[0; 15]),
            Err(HandshakeError::Malformed { len: 15 })
        ));
        assert!(matches!(
            decode(&[0; 17]),
            Err(HandshakeError::Malformed { len: 17 })
        ));
    }

    #[tokio::test]
    async fn test_handshake_over_link() {
        let (mut a, mut b) = tokio::io::duplex(64);
        let id = ConnectionId::random();
        write_handshake(&mut a, &id).await.unwrap();
        let read = read_handshake(&mut b, None).await.unwrap();
        assert_eq!(read, id);
    }

    #[tokio::test]
    async fn test_packet_size_on_wire() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_handshake(&mut a, &ConnectionId::random()).await.unwrap();
        drop(a);
        let mut raw = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut b, &mut raw)
            .await
            .unwrap();
        assert_eq!(raw.len(), HANDSHAKE_PACKET_SIZE);
        assert_eq!(&raw[..4], &16u32.to_be_bytes());
    }

    #[tokio::test]
    async fn test_peer_closes_before_identifying() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        let err = read_handshake(&mut b, None).await.unwrap_err();
        assert!(matches!(err, HandshakeError::Frame(FrameError::Closed)));
    }

    #[tokio::test]
    async fn test_application_traffic_before_handshake_fails() {
        let (mut a, mut b) = tokio::io::duplex(256);
        write_frame(&mut a, b"definitely not an identifier", 1024)
            .await
            .unwrap();
        let err = read_handshake(&mut b, None).await.unwrap_err();
        assert!(matches!(
            err,
            HandshakeError::Frame(FrameError::TooLarge { .. })
        ));
    }

    #[tokio::test]
    async fn test_short_body_is_malformed() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_frame(&mut a, &[1, 2, 3], 1024).await.unwrap();
        let err = read_handshake(&mut b, None).await.unwrap_err();
        assert!(matches!(err, HandshakeError::Malformed { len: 3 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_silent_peer_times_out() {
        let (mut a, mut b) = tokio::io::duplex(64);
        // Half a prefix, then silence.
        a.write_all(&[0, 0]).await.unwrap();
        let err = read_handshake(&mut b, Some(Duration::from_secs(5)))
            .await
            .unwrap_err();
        assert!(matches!(err, HandshakeError::TimedOut { .. }));
        drop(a);
    }
}
