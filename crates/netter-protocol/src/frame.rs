//! Length-prefixed framing.
//!
//! A frame is a 4-byte big-endian payload length followed by the payload:
//!
//! ```text
//! ┌──────────────┬───────────────────────┐
//! │ len: u32 BE  │ payload (len bytes)   │
//! └──────────────┴───────────────────────┘
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt};

use crate::ProtocolError;

/// Size of the length prefix in bytes.
pub const LENGTH_PREFIX_LEN: usize = 4;

/// Default upper bound on a frame's payload (8 MiB).
pub const DEFAULT_MAX_FRAME_LEN: usize = 8 * 1024 * 1024;

const READ_CHUNK: usize = 4096;

/// Prefixes `payload` with its length.
///
/// # Errors
/// [`ProtocolError::FrameTooLarge`] if `payload` is longer than `max_len`.
pub fn encode_frame(payload: &[u8], max_len: usize) -> Result<Bytes, ProtocolError> {
    if payload.len() > max_len || payload.len() > u32::MAX as usize {
        return Err(ProtocolError::FrameTooLarge {
            len: payload.len(),
            max: max_len,
        });
    }
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_LEN + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Removes one complete frame from the front of `buffer`.
///
/// Returns `Ok(None)` and leaves `buffer` untouched when it holds only part
/// of a frame. The length prefix is checked against `max_len` as soon as it
/// has arrived, before any of the payload is buffered.
pub fn split_frame(
    buffer: &mut BytesMut,
    max_len: usize,
) -> Result<Option<Bytes>, ProtocolError> {
    if buffer.len() < LENGTH_PREFIX_LEN {
        return Ok(None);
    }
    let mut prefix = &buffer[..LENGTH_PREFIX_LEN];
    let len = prefix.get_u32() as usize;
    if len > max_len {
        return Err(ProtocolError::FrameTooLarge { len, max: max_len });
    }

    let total = LENGTH_PREFIX_LEN + len;
    if buffer.len() < total {
        buffer.reserve(total - buffer.len());
        return Ok(None);
    }

    buffer.advance(LENGTH_PREFIX_LEN);
    Ok(Some(buffer.split_to(len).freeze()))
}

/// Performs one read from `reader`, appending to `buffer`.
///
/// # Errors
/// End-of-stream is an error here: [`ProtocolError::ConnectionClosed`] if
/// nothing was buffered, [`ProtocolError::Truncated`] if a partial frame
/// was.
pub async fn read_more<R>(
    reader: &mut R,
    buffer: &mut BytesMut,
) -> Result<usize, ProtocolError>
where
    R: AsyncRead + Unpin + Send,
{
    buffer.reserve(READ_CHUNK);
    let n = reader.read_buf(buffer).await?;
    if n == 0 {
        return if buffer.is_empty() {
            Err(ProtocolError::ConnectionClosed)
        } else {
            Err(ProtocolError::Truncated {
                buffered: buffer.len(),
            })
        };
    }
    Ok(n)
}
