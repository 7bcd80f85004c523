//! Length framing for packets carried on a raw link.
//!
//! Frame format: `[length:4][body:length]`
//!
//! - **length**: body size in bytes (big-endian u32)
//! - **body**: opaque payload
//!
//! The handshake packet and packets sent on a bound connection share this
//! framing. Readers enforce a maximum body size before allocating.

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Size of the length prefix.
pub const LENGTH_PREFIX_SIZE: usize = 4;

/// Default maximum body size (1MB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Framing errors.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The link closed before a complete frame arrived.
    #[error("link closed before a complete frame was received")]
    Closed,

    /// Body exceeds the configured maximum.
    #[error("frame too large: {size} bytes (max {max})")]
    TooLarge {
        /// Announced or requested body size.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// Underlying I/O failure.
    #[error("link I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Write one frame and flush it.
pub async fn write_frame<W>(writer: &mut W, body: &[u8], max: usize) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    if body.len() > max || body.len() > u32::MAX as usize {
        return Err(FrameError::TooLarge {
            size: body.len(),
            max,
        });
    }

    let mut packet = Vec::with_capacity(LENGTH_PREFIX_SIZE + body.len());
    packet.extend_from_slice(&(body.len() as u32).to_be_bytes());
    packet.extend_from_slice(body);

    writer.write_all(&packet).await?;
    writer.flush().await?;
    Ok(())
}

/// Read exactly one frame.
///
/// End of stream anywhere inside the frame, including before the first
/// length byte, is reported as [`FrameError::Closed`].
pub async fn read_frame<R>(reader: &mut R, max: usize) -> Result<Bytes, FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    read_exact_or_closed(reader, &mut prefix).await?;

    let size = u32::from_be_bytes(prefix) as usize;
    if size > max {
        return Err(FrameError::TooLarge { size, max });
    }

    let mut body = vec![0u8; size];
    read_exact_or_closed(reader, &mut body).await?;
    Ok(Bytes::from(body))
}

async fn read_exact_or_closed<R>(reader: &mut R, buf: &mut [u8]) -> Result<(), FrameError>
where
    R: AsyncRead + Unpin + ?Sized,
{
    match reader.read_exact(buf).await {
        Ok(_) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => Err(FrameError::Closed),
        Err(e) => Err(FrameError::Io(e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_frame_through_duplex() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_frame(&mut a, b"hello", DEFAULT_MAX_FRAME_SIZE)
            .await
            .unwrap();
        let body = read_frame(&mut b, DEFAULT_MAX_FRAME_SIZE).await.unwrap();
        assert_eq!(&body[..], b"hello");
    }

    #[tokio::test]
    async fn test_empty_frame() {
        let (mut a, mut b) = tokio::io::duplex(64);
        write_frame(&mut a, b"", DEFAULT_MAX_FRAME_SIZE).await.unwrap();
        let body = read_frame(&mut b, DEFAULT_MAX_FRAME_SIZE).await.unwrap();
        assert!(body.is_empty());
    }

    #[tokio::test]
    async fn test_closed_before_prefix() {
        let (a, mut b) = tokio::io::duplex(64);
        drop(a);
        let err = read_frame(&mut b, DEFAULT_MAX_FRAME_SIZE).await.unwrap_err();
        assert!(matches!(err, FrameError::Closed));
    }

    #[tokio::test]
    async fn test_closed_mid_body() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&10u32.to_be_bytes()).await.unwrap();
        a.write_all(b"abc").await.unwrap();
        drop(a);
        let err = read_frame(&mut b, DEFAULT_MAX_FRAME_SIZE).await.unwrap_err();
        assert!(matches!(err, FrameError::Closed));
    }

    #[tokio::test]
    async fn test_oversized_announcement_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&1000u32.to_be_bytes()).await.unwrap();
        let err = read_frame(&mut b, 100).await.unwrap_err();
        assert!(matches!(err, FrameError::TooLarge { size: 1000, max: 100 }));
    }

    #[tokio::test]
    async fn test_oversized_write_rejected() {
        let (mut a, _b) = tokio::io::duplex(64);
        let err = write_frame(&mut a, &[0u8; 32], 16).await.unwrap_err();
        assert!(matches!(err, FrameError::TooLarge { size: 32, max: 16 }));
    }
}
