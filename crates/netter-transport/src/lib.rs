//! Transport layer for netter.
//!
//! Provides the byte-stream plumbing every session sits on:
//!
//! - [`Connection`] — one established stream (TCP or unix),
//!   split into a [`ConnectionReader`] and a [`ConnectionWriter`] so one
//!   task can read while another writes.
//! - [`Listener`] — binds an address and accepts connections. It
//!   implements the [`Acceptor`] trait, which is what accept loops are
//!   written against.
//! - [`TransportError`] — bind/connect/accept failures, plus the
//!   distinguished [`TransportError::Closed`] condition and the
//!   transient-vs-permanent classification used for accept backoff.

mod connection;
mod error;
mod listener;

pub use connection::{Connection, ConnectionReader, ConnectionWriter};
pub use error::TransportError;
pub use listener::Listener;

use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

// ---------------------------------------------------------------------------
// Network
// ---------------------------------------------------------------------------

/// The kind of socket to listen on or dial.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    /// TCP over IPv4 or IPv6. Parsed from `"tcp"`, `"tcp4"` or `"tcp6"`.
    Tcp,
    /// Unix domain stream socket. Parsed from `"unix"`.
    #[cfg(unix)]
    Unix,
}

impl FromStr for Network {
    type Err = TransportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tcp" | "tcp4" | "tcp6" => Ok(Self::Tcp),
            #[cfg(unix)]
            "unix" => Ok(Self::Unix),
            other => Err(TransportError::UnsupportedNetwork(other.to_string())),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp => f.write_str("tcp"),
            #[cfg(unix)]
            Self::Unix => f.write_str("unix"),
        }
    }
}

// ---------------------------------------------------------------------------
// Endpoint / ConnectionInfo
// ---------------------------------------------------------------------------

/// One side of a connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// A TCP socket address.
    Tcp(SocketAddr),
    /// A unix socket; unnamed sockets (e.g. the client side) have no path.
    Unix(Option<PathBuf>),
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tcp(addr) => write!(f, "tcp://{addr}"),
            Self::Unix(Some(path)) => write!(f, "unix://{}", path.display()),
            Self::Unix(None) => f.write_str("unix://(unnamed)"),
        }
    }
}

/// Addresses of an established connection, captured when it was created.
///
/// Sessions expose this instead of the raw stream: reads and writes are
/// owned by the session's loops, but protocols and callers still need to
/// know who is on the other end.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Our side.
    pub local: Endpoint,
    /// The remote side.
    pub peer: Endpoint,
}

// ---------------------------------------------------------------------------
// Acceptor
// ---------------------------------------------------------------------------

/// Produces inbound connections.
///
/// [`Listener`] is the socket-backed implementation; accept loops are
/// generic over this trait so they can be driven by scripted acceptors
/// in tests.
pub trait Acceptor: Send + Sync + 'static {
    /// Waits for and accepts the next incoming connection.
    ///
    /// After [`close`](Self::close) has been called this must resolve to
    /// [`TransportError::Closed`], including for a call already pending.
    fn accept(
        &self,
    ) -> impl Future<Output = Result<Connection, TransportError>> + Send;

    /// Stops accepting. Idempotent.
    fn close(&self);
}
