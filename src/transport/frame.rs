//! Length-prefixed framing of [NetMessage]s over a byte stream.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::common::NetMessage;
use crate::{Error, Result};

/// Largest accepted frame, large enough for a user record with its avatar.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Write one message as a 4-byte big-endian length followed by its bencoded bytes.
pub async fn write_message<S>(io: &mut S, message: &NetMessage) -> Result<()>
where
    S: AsyncWrite + Unpin,
{
    let encoded = message.to_bytes()?;
    if encoded.len() > MAX_FRAME_SIZE {
        return Err(Error::FrameTooLarge(encoded.len()));
    }

    io.write_u32(encoded.len() as u32).await?;
    io.write_all(&encoded).await?;
    io.flush().await?;

    Ok(())
}

/// Read one length-prefixed message.
///
/// A frame that was read completely but fails to decode is reported as a decode error,
/// leaving the stream positioned at the next frame.
pub async fn read_message<S>(io: &mut S) -> Result<NetMessage>
where
    S: AsyncRead + Unpin,
{
    let len = io.read_u32().await? as usize;
    if len > MAX_FRAME_SIZE {
        return Err(Error::FrameTooLarge(len));
    }

    let mut buf = vec![0_u8; len];
    io.read_exact(&mut buf).await?;

    NetMessage::from_bytes(&buf)
}
