//! # Netter
//!
//! Protocol-agnostic connection management over stream sockets.
//!
//! Netter accepts or dials connections, wraps each in a [`Session`] with
//! its own read and write tasks, and leaves the wire format to a
//! [`Protocol`] you plug in. Sessions close exactly once, sends never
//! block in buffered mode, and a peer too slow to drain its send queue is
//! disconnected instead of buffered without bound.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use netter::prelude::*;
//!
//! # async fn run() -> Result<(), NetterError> {
//! let echo = handler_fn(|session: &Session<LengthDelimited>, msg: Bytes| {
//!     let session = session.clone();
//!     tokio::spawn(async move {
//!         let _ = session.send(msg).await;
//!     });
//! });
//!
//! let server = listen(Network::Tcp, "127.0.0.1:7000", LengthDelimited::new(), echo, 64).await?;
//! server
//!     .run(|session| {
//!         session.start();
//!     })
//!     .await
//! # }
//! ```
//!
//! ## Crates
//!
//! ```text
//! netter            listen / dial / Server / backoff (this crate)
//!   netter-session    Session, send pipeline, read loop, Handler
//!   netter-protocol   Protocol, length-delimited and JSON codecs
//!   netter-transport  Network, Connection, Listener, Acceptor
//! ```

mod backoff;
mod error;
mod server;

pub use backoff::{Backoff, BackoffConfig, DEFAULT_INITIAL_BACKOFF, DEFAULT_MAX_BACKOFF};
pub use error::NetterError;
pub use server::{Server, ServerBuilder, ServerConfig, dial, listen};

pub use netter_protocol as protocol;
pub use netter_session as session;
pub use netter_transport as transport;

pub use netter_protocol::{JsonProtocol, LengthDelimited, Protocol, ProtocolError};
pub use netter_session::{
    Handler, Session, SessionConfig, SessionError, SessionId, SessionState,
    handler_fn,
};
pub use netter_transport::{
    Acceptor, Connection, ConnectionInfo, Endpoint, Listener, Network,
    TransportError,
};

/// Commonly used items, for glob import.
pub mod prelude {
    pub use crate::{
        Acceptor, BackoffConfig, Endpoint, Handler, JsonProtocol,
        LengthDelimited, NetterError, Network, Protocol, Server, ServerBuilder,
        ServerConfig, Session, SessionConfig, SessionError, SessionId,
        SessionState, dial, handler_fn, listen,
    };
    pub use bytes::Bytes;
}
