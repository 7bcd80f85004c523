//! Tests for the handshake codec and raw-link framing.
//!
//! # Test Strategy
//!
//! 1. **Wire format**: exact bytes of the single handshake packet
//! 2. **Failure paths**: early close, garbage, oversized announcements
//! 3. **Properties**: arbitrary bytes never decode into something unexpected

use corelib::connection_id::{ConnectionId, CONNECTION_ID_LEN};
use corelib::frame::{read_frame, write_frame, FrameError};
use corelib::handshake::{self, read_handshake, write_handshake, HandshakeError};
use proptest::prelude::*;
use std::collections::HashSet;
use tokio::io::AsyncWriteExt;

// ============================================================================
// Wire Format Tests
// ============================================================================

#[tokio::test]
async fn test_handshake_is_the_first_frame_only() {
    // The codec consumes exactly one frame and leaves the rest of the link alone
    let (mut a, mut b) = tokio::io::duplex(256);
    let id = ConnectionId::random();

    write_handshake(&mut a, &id).await.unwrap();
    write_frame(&mut a, b"application data", 1024).await.unwrap();

    assert_eq!(read_handshake(&mut b, None).await.unwrap(), id);
    let next = read_frame(&mut b, 1024).await.unwrap();
    assert_eq!(&next[..], b"application data");
}

#[tokio::test]
async fn test_handshake_bytes() {
    let (mut a, mut b) = tokio::io::duplex(64);
    let id = ConnectionId::from_bytes([
        0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15,
    ]);
    write_handshake(&mut a, &id).await.unwrap();
    drop(a);

    let mut raw = Vec::new();
    tokio::io::AsyncReadExt::read_to_end(&mut b, &mut raw)
        .await
        .unwrap();

    let mut expected = vec![0, 0, 0, 16];
    expected.extend(0u8..16);
    assert_eq!(raw, expected);
}

// ============================================================================
// Failure Path Tests
// ============================================================================

#[tokio::test]
async fn test_truncated_identifier() {
    let (mut a, mut b) = tokio::io::duplex(64);
    a.write_all(&16u32.to_be_bytes()).await.unwrap();
    a.write_all(&[9; 8]).await.unwrap();
    drop(a);

    let err = read_handshake(&mut b, None).await.unwrap_err();
    assert!(matches!(err, HandshakeError::Frame(FrameError::Closed)));
}

#[tokio::test]
async fn test_write_on_closed_link_fails() {
    let (mut a, b) = tokio::io::duplex(64);
    drop(b);
    let err = write_handshake(&mut a, &ConnectionId::random())
        .await
        .unwrap_err();
    assert!(matches!(err, HandshakeError::Frame(FrameError::Io(_))));
}

// ============================================================================
// Property Tests
// ============================================================================

proptest! {
    #[test]
    fn prop_decode_accepts_exactly_identifier_sized_bodies(body in proptest::collection::vec(any::<u8>(), 0..64)) {
        let decoded = handshake::decode(&body);
        if body.len() == CONNECTION_ID_LEN {
            let id = decoded.unwrap();
            prop_assert_eq!(&id.as_bytes()[..], &body[..]);
        } else {
            let is_malformed = matches!(decoded, Err(HandshakeError::Malformed { .. }));
            prop_assert!(is_malformed);
        }
    }

    #[test]
    fn prop_encode_is_identity_on_bytes(bytes in any::<[u8; 16]>()) {
        let id = ConnectionId::from_bytes(bytes);
        prop_assert_eq!(handshake::encode(&id).unwrap(), bytes.to_vec());
    }

    #[test]
    fn prop_random_ids_do_not_collide(count in 1usize..512) {
        let ids: HashSet<ConnectionId> = (0..count).map(|_| ConnectionId::random()).collect();
        prop_assert_eq!(ids.len(), count);
    }
}
