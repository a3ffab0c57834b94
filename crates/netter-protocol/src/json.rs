//! JSON messages inside length-delimited frames.
//!
//! JSON is human-readable, which makes it handy while developing a
//! protocol: frames can be logged and inspected as text. The tradeoff is
//! size; a binary protocol is the better fit once the message set settles.

use std::fmt;
use std::marker::PhantomData;

use bytes::{Bytes, BytesMut};
use netter_transport::ConnectionReader;
use serde::{Serialize, de::DeserializeOwned};

use crate::frame::encode_frame;
use crate::{LengthDelimited, Protocol, ProtocolError};

/// A [`Protocol`] carrying serde values of type `T` as JSON documents,
/// one per length-delimited frame.
///
/// ```rust
/// use netter_protocol::{JsonProtocol, Protocol};
/// use serde::{Deserialize, Serialize};
///
/// #[derive(Serialize, Deserialize)]
/// struct Ping { seq: u32 }
///
/// let protocol = JsonProtocol::<Ping>::new();
/// let wire = protocol.encode(&Ping { seq: 7 }).unwrap();
/// assert_eq!(&wire[4..], br#"{"seq":7}"#);
/// ```
pub struct JsonProtocol<T> {
    frames: LengthDelimited,
    // Produces `T` values, never stores one.
    _message: PhantomData<fn() -> T>,
}

impl<T> JsonProtocol<T> {
    /// Creates the protocol with the default frame limit.
    pub fn new() -> Self {
        Self::with_frames(LengthDelimited::new())
    }

    /// Creates the protocol on top of a configured frame layer.
    pub fn with_frames(frames: LengthDelimited) -> Self {
        Self {
            frames,
            _message: PhantomData,
        }
    }
}

impl<T> Default for JsonProtocol<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Clone for JsonProtocol<T> {
    fn clone(&self) -> Self {
        Self::with_frames(self.frames)
    }
}

impl<T> fmt::Debug for JsonProtocol<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonProtocol")
            .field("max_frame_len", &self.frames.max_frame_len())
            .finish()
    }
}

impl<T> Protocol for JsonProtocol<T>
where
    T: Serialize + DeserializeOwned + Send + 'static,
{
    type Message = T;
    type Error = ProtocolError;

    async fn decode(
        &self,
        reader: &mut ConnectionReader,
        buffer: &mut BytesMut,
    ) -> Result<Option<T>, ProtocolError> {
        match self.frames.decode(reader, buffer).await? {
            Some(frame) => serde_json::from_slice(&frame)
                .map(Some)
                .map_err(ProtocolError::Decode),
            None => Ok(None),
        }
    }

    fn encode(&self, message: &T) -> Result<Bytes, ProtocolError> {
        let payload = serde_json::to_vec(message).map_err(ProtocolError::Encode)?;
        encode_frame(&payload, self.frames.max_frame_len())
    }
}
