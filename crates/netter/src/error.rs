//! Unified error type for netter.

use netter_protocol::ProtocolError;
use netter_session::SessionError;
use netter_transport::TransportError;

/// Top-level error that wraps every layer's error.
///
/// When using the `netter` facade you deal with this single type instead
/// of importing errors from each sub-crate; `?` converts them.
#[derive(Debug, thiserror::Error)]
pub enum NetterError {
    /// Binding, dialing, or accepting failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A built-in protocol failed outside a session.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// A session operation failed.
    #[error(transparent)]
    Session(#[from] SessionError),
}
