//! Length-prefixed bincode framing used by every RPC connection
//!
//! A frame is a 4-byte big-endian length followed by that many bytes of
//! bincode-encoded payload.

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::errors::{SharedError, SharedResult};

/// Largest frame accepted in either direction
pub const MAX_FRAME_SIZE: usize = 1024 * 1024;

/// Encode a message as a bincode payload
pub fn encode<T: Serialize>(message: &T) -> SharedResult<Vec<u8>> {
    bincode::serialize(message).map_err(|e| SharedError::SerializationError {
        message: e.to_string(),
    })
}

/// Decode a bincode payload
pub fn decode<T: DeserializeOwned>(data: &[u8]) -> SharedResult<T> {
    bincode::deserialize(data).map_err(|e| SharedError::DeserializationError {
        message: e.to_string(),
    })
}

/// Write message with length prefix
pub async fn write_frame<W, T>(writer: &mut W, message: &T) -> SharedResult<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let data = encode(message)?;
    if data.len() > MAX_FRAME_SIZE {
        return Err(SharedError::FrameTooLarge {
            size: data.len(),
            limit: MAX_FRAME_SIZE,
        });
    }

    let len = data.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(&data).await?;
    writer.flush().await?;
    Ok(())
}

/// Read message with length prefix
///
/// A peer that closes the connection before sending a length prefix yields
/// `ConnectionClosed` rather than an I/O error.
pub async fn read_frame<R, T>(reader: &mut R) -> SharedResult<T>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_bytes = [0u8; 4];
    match reader.read_exact(&mut len_bytes).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(SharedError::ConnectionClosed);
        }
        Err(e) => return Err(e.into()),
    }

    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(SharedError::FrameTooLarge {
            size: len,
            limit: MAX_FRAME_SIZE,
        });
    }

    let mut data = vec![0u8; len];
    reader.read_exact(&mut data).await?;
    decode(&data)
}
