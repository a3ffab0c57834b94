//! Raw length-delimited byte frames.

use bytes::{Bytes, BytesMut};
use netter_transport::ConnectionReader;

use crate::frame::{DEFAULT_MAX_FRAME_LEN, encode_frame, read_more, split_frame};
use crate::{Protocol, ProtocolError};

/// A [`Protocol`] whose messages are opaque byte frames.
///
/// Each message travels as a 4-byte big-endian length followed by the
/// bytes. Frames longer than [`max_frame_len`](Self::max_frame_len) are
/// rejected in both directions.
///
/// ```rust
/// use netter_protocol::{LengthDelimited, Protocol};
///
/// let protocol = LengthDelimited::new();
/// let wire = protocol.encode(&bytes::Bytes::from_static(b"hi")).unwrap();
/// assert_eq!(&wire[..], &[0, 0, 0, 2, b'h', b'i']);
/// ```
#[derive(Debug, Clone, Copy)]
pub struct LengthDelimited {
    max_frame_len: usize,
}

impl LengthDelimited {
    /// Creates the protocol with the default 8 MiB frame limit.
    pub fn new() -> Self {
        Self {
            max_frame_len: DEFAULT_MAX_FRAME_LEN,
        }
    }

    /// Sets the largest accepted payload.
    pub fn with_max_frame_len(mut self, max_frame_len: usize) -> Self {
        self.max_frame_len = max_frame_len;
        self
    }

    /// The largest accepted payload.
    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }
}

impl Default for LengthDelimited {
    fn default() -> Self {
        Self::new()
    }
}

impl Protocol for LengthDelimited {
    type Message = Bytes;
    type Error = ProtocolError;

    async fn decode(
        &self,
        reader: &mut ConnectionReader,
        buffer: &mut BytesMut,
    ) -> Result<Option<Bytes>, ProtocolError> {
        if let Some(frame) = split_frame(buffer, self.max_frame_len)? {
            return Ok(Some(frame));
        }
        read_more(reader, buffer).await?;
        split_frame(buffer, self.max_frame_len)
    }

    fn encode(&self, message: &Bytes) -> Result<Bytes, ProtocolError> {
        encode_frame(message, self.max_frame_len)
    }
}
