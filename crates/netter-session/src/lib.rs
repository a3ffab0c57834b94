//! Managed connection sessions for netter.
//!
//! A [`Session`] owns one connection and drives it with two independent
//! tasks:
//!
//! 1. **Read loop** — repeatedly asks the [`Protocol`] to decode the next
//!    message and dispatches it to the session's [`Handler`].
//! 2. **Write loop** — drains the bounded send queue, encoding and writing
//!    each message in FIFO order (buffered mode only).
//!
//! Either loop, or any external owner, may close the session. Closing is
//! idempotent: exactly one caller performs the teardown, everyone else
//! gets [`SessionError::Closed`].
//!
//! # How it fits in the stack
//!
//! ```text
//! Listener / dial (above)  ← create sessions from accepted/dialed connections
//!     ↕
//! Session Layer (this crate)  ← lifecycle, send pipeline, dispatch
//!     ↕
//! Protocol + Transport (below)  ← bytes ↔ messages, sockets
//! ```

mod error;
mod handler;
mod id;
mod pipeline;
mod reader;
mod session;

pub use error::{BoxError, SessionError};
pub use handler::{DynHandler, Handler, HandlerFn, SharedHandler, handler_fn};
pub use id::{SessionId, SessionIdGenerator};
pub use session::{Session, SessionConfig, SessionState};

pub use netter_protocol::Protocol;
pub use netter_transport::ConnectionInfo;
