//! Length-Prefixed Framing
//!
//! Every message on the wire is a 4-byte big-endian length followed by that
//! many payload bytes. Any partial read or write is a dead connection.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use thiserror::Error;

/// Largest accepted payload (1 MiB).
pub const MAX_FRAME_LEN: usize = 1 << 20;

/// Framing failures.
#[derive(Debug, Error)]
pub enum FrameError {
    /// Socket failed or closed mid-frame
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Declared length exceeds the limit
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    TooLarge {
        /// Declared or attempted length
        len: usize,
        /// Limit
        max: usize,
    },
}

impl FrameError {
    /// True if the peer simply went away.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, FrameError::Io(e) if e.kind() == std::io::ErrorKind::UnexpectedEof)
    }
}

/// Read one frame.
pub async fn read_frame<R>(reader: &mut R) -> Result<Vec<u8>, FrameError>
where
    R: AsyncRead + Unpin,
{
    let len = reader.read_u32().await? as usize;
    if len > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge { len, max: MAX_FRAME_LEN });
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Write one frame and flush it.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge { len: payload.len(), max: MAX_FRAME_LEN });
    }
    writer.write_u32(payload.len() as u32).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}
