//! Error types for the session layer.

/// A protocol error with its concrete type erased.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur on a session.
///
/// Everything except [`Closed`](Self::Closed) is fatal to the session it
/// happened on, and only to that session.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The session is already closed. Returned by every operation after
    /// close, and by every `close()` call but the one that did the work.
    #[error("session closed")]
    Closed,

    /// The send queue was full. The session has been closed: a peer that
    /// cannot keep up is disconnected rather than buffered without bound.
    #[error("send queue saturated")]
    SendQueueSaturated,

    /// The protocol failed to decode inbound bytes.
    #[error("decode failed: {0}")]
    Decode(#[source] BoxError),

    /// The protocol failed to encode an outbound message.
    #[error("encode failed: {0}")]
    Encode(#[source] BoxError),

    /// Writing encoded bytes to the connection failed.
    #[error("write failed: {0}")]
    Write(#[source] BoxError),
}
