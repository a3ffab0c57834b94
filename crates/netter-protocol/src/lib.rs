//! Wire protocols for netter.
//!
//! A session never interprets bytes itself. It hands its connection to a
//! [`Protocol`], which knows how to turn bytes into messages and messages
//! back into bytes:
//!
//! - **[`Protocol`]** — the capability a user supplies (decode / encode /
//!   write).
//! - **Framing helpers** ([`encode_frame`], [`split_frame`], [`read_more`])
//!   — building blocks for length-prefixed formats.
//! - **Ready-made protocols** — [`LengthDelimited`] for raw byte frames and
//!   [`JsonProtocol`] for serde types.
//!
//! ```text
//! Transport (bytes) → Protocol (messages) → Session (lifecycle)
//! ```

mod error;
mod frame;
#[cfg(feature = "json")]
mod json;
mod length;

pub use error::ProtocolError;
pub use frame::{
    DEFAULT_MAX_FRAME_LEN, LENGTH_PREFIX_LEN, encode_frame, read_more,
    split_frame,
};
#[cfg(feature = "json")]
pub use json::JsonProtocol;
pub use length::LengthDelimited;

use std::future::Future;

use bytes::{Bytes, BytesMut};
use netter_transport::{ConnectionReader, ConnectionWriter};
use tokio::io::AsyncWriteExt;

/// Converts between a connection's bytes and typed messages.
///
/// ## Decoding and the retained buffer
///
/// A session's read loop calls [`decode`](Self::decode) over and over,
/// passing the same `buffer` each time. The buffer starts empty and keeps
/// whatever bytes a previous call read but did not consume, so a message
/// split across several socket reads is assembled piece by piece:
///
/// - `Ok(Some(msg))` — a complete message was decoded.
/// - `Ok(None)` — more bytes are needed. This is not an error; the loop
///   calls `decode` again with the retained bytes. An implementation
///   returning `Ok(None)` must have made progress (read from the
///   connection), otherwise the loop spins.
/// - `Err(e)` — the input is malformed or the connection is gone. The
///   session closes.
///
/// ## Thread safety
///
/// One protocol value is shared (read-only) by every session a listener
/// creates, hence `Send + Sync + 'static`. The futures it returns must be
/// `Send` because session loops run on the multi-threaded runtime.
pub trait Protocol: Send + Sync + 'static {
    /// The decoded message type.
    type Message: Send + 'static;

    /// Errors from decoding, encoding, or writing.
    type Error: std::error::Error + From<std::io::Error> + Send + Sync + 'static;

    /// Reads from `reader` until one message can be decoded, or returns
    /// `Ok(None)` if the bytes read so far are not yet a whole message.
    fn decode(
        &self,
        reader: &mut ConnectionReader,
        buffer: &mut BytesMut,
    ) -> impl Future<Output = Result<Option<Self::Message>, Self::Error>> + Send;

    /// Encodes one message into the bytes that go on the wire.
    fn encode(&self, message: &Self::Message) -> Result<Bytes, Self::Error>;

    /// Writes encoded bytes to the connection.
    ///
    /// The default writes everything and flushes. Override it to add
    /// per-write timeouts or batching.
    fn write(
        &self,
        writer: &mut ConnectionWriter,
        bytes: &[u8],
    ) -> impl Future<Output = Result<(), Self::Error>> + Send {
        async move {
            writer.write_all(bytes).await?;
            writer.flush().await?;
            Ok(())
        }
    }
}
