use std::io;

/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The network name is not one this build can listen on or dial.
    #[error("unsupported network: {0}")]
    UnsupportedNetwork(String),

    /// Binding a listener failed.
    #[error("bind failed: {0}")]
    Bind(#[source] io::Error),

    /// Establishing an outbound connection failed.
    #[error("connect failed: {0}")]
    Connect(#[source] io::Error),

    /// Accepting an inbound connection failed.
    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),

    /// The listener was closed. Not a failure: it is how an accept loop
    /// learns that it should stop.
    #[error("listener closed")]
    Closed,
}

impl TransportError {
    /// Returns `true` if this is an accept failure worth retrying after a
    /// pause (e.g. the process ran out of file descriptors for a moment).
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Accept(e) => is_transient_io(e),
            _ => false,
        }
    }

    /// Returns `true` if this error means the listener was closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, Self::Closed)
    }
}

/// errno values for descriptor and buffer exhaustion. `std` files these
/// under an uncategorized kind, so they are matched by raw code.
#[cfg(target_os = "linux")]
const TRANSIENT_ERRNOS: &[i32] = &[
    12,  // ENOMEM
    23,  // ENFILE
    24,  // EMFILE
    105, // ENOBUFS
];

#[cfg(not(target_os = "linux"))]
const TRANSIENT_ERRNOS: &[i32] = &[];

fn is_transient_io(e: &io::Error) -> bool {
    use io::ErrorKind::*;

    if matches!(
        e.kind(),
        WouldBlock
            | Interrupted
            | ConnectionAborted
            | ConnectionReset
            | TimedOut
            | OutOfMemory
    ) {
        return true;
    }
    e.raw_os_error()
        .is_some_and(|code| TRANSIENT_ERRNOS.contains(&code))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn accept_err(kind: io::ErrorKind) -> TransportError {
        TransportError::Accept(io::Error::new(kind, "test"))
    }

    #[test]
    fn test_would_block_is_transient() {
        assert!(accept_err(io::ErrorKind::WouldBlock).is_transient());
        assert!(accept_err(io::ErrorKind::ConnectionAborted).is_transient());
        assert!(accept_err(io::ErrorKind::Interrupted).is_transient());
    }

    #[test]
    fn test_permission_denied_is_permanent() {
        assert!(!accept_err(io::ErrorKind::PermissionDenied).is_transient());
        assert!(!accept_err(io::ErrorKind::InvalidInput).is_transient());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_fd_exhaustion_is_transient() {
        let err = TransportError::Accept(io::Error::from_raw_os_error(24));
        assert!(err.is_transient());
    }

    #[test]
    fn test_closed_is_not_transient() {
        let err = TransportError::Closed;
        assert!(err.is_closed());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_only_accept_errors_are_transient() {
        let err = TransportError::Connect(io::Error::new(
            io::ErrorKind::WouldBlock,
            "test",
        ));
        assert!(!err.is_transient());
    }
}
