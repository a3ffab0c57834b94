//! Error types for the protocol layer.

/// Errors produced by the built-in protocols and framing helpers.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Reading from or writing to the connection failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the connection between messages.
    #[error("connection closed by peer")]
    ConnectionClosed,

    /// The peer closed the connection part-way through a frame.
    #[error("connection closed mid-frame ({buffered} bytes buffered)")]
    Truncated {
        /// Bytes of the unfinished frame that had arrived.
        buffered: usize,
    },

    /// A frame's declared length is over the configured maximum.
    #[error("frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge {
        /// Declared or actual payload length.
        len: usize,
        /// Configured maximum.
        max: usize,
    },

    /// Serializing a message failed.
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// A complete frame arrived but its payload is not a valid message.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),
}
