//! The session: one connection, its lifecycle, and its public surface.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};

use netter_protocol::Protocol;
use netter_transport::{Connection, ConnectionInfo, ConnectionReader, ConnectionWriter};
use tokio_util::sync::CancellationToken;

use crate::pipeline::{self, SendQueue};
use crate::reader;
use crate::{SessionError, SessionId, SharedHandler};

// ---------------------------------------------------------------------------
// SessionConfig
// ---------------------------------------------------------------------------

/// Per-session settings, shared by every session a listener creates.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Capacity of the outbound queue.
    ///
    /// - `0` (default): synchronous mode. [`Session::send`] encodes and
    ///   writes on the caller's task, one sender at a time.
    /// - `n > 0`: buffered mode. `send` enqueues without waiting and a
    ///   dedicated write loop drains the queue. If `n` messages are already
    ///   waiting, `send` fails with [`SessionError::SendQueueSaturated`] and
    ///   the session is closed.
    pub send_queue_size: usize,
}

impl SessionConfig {
    /// Config for buffered mode with the given queue capacity.
    pub fn buffered(send_queue_size: usize) -> Self {
        Self { send_queue_size }
    }
}

// ---------------------------------------------------------------------------
// SessionState
// ---------------------------------------------------------------------------

/// Lifecycle of a session. Only ever moves forward:
///
/// ```text
///   Created ──(start)──→ Running ──(close)──→ Closed
///      │                                        ↑
///      └───────────────(close)──────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    /// Constructed; loops not launched yet.
    Created = 0,
    /// Read loop (and write loop, in buffered mode) running.
    Running = 1,
    /// Terminal.
    Closed = 2,
}

impl SessionState {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Created,
            1 => Self::Running,
            _ => Self::Closed,
        }
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

type CloseCallback<P> = Box<dyn FnOnce(&Session<P>) + Send>;
pub(crate) type SendCallback<P> =
    Arc<dyn Fn(&Session<P>, &<P as Protocol>::Message) + Send + Sync>;

pub(crate) struct Inner<P: Protocol> {
    pub(crate) id: SessionId,
    pub(crate) info: ConnectionInfo,
    pub(crate) state: AtomicU8,
    pub(crate) protocol: Arc<P>,
    pub(crate) handler: SharedHandler<P>,
    /// Broadcast-once; wakes both loops and any in-flight write.
    pub(crate) cancel: CancellationToken,
    /// Held here until `start` moves it into the read loop.
    pub(crate) reader: Mutex<Option<ConnectionReader>>,
    /// Synchronous-mode senders take turns on this lock; in buffered mode
    /// the write loop moves the writer out when it starts.
    pub(crate) writer: tokio::sync::Mutex<Option<ConnectionWriter>>,
    pub(crate) queue: Option<SendQueue<P::Message>>,
    pub(crate) on_close: Mutex<Option<CloseCallback<P>>>,
    pub(crate) on_send: RwLock<Option<SendCallback<P>>>,
}

/// A managed connection.
///
/// `Session` is a cheap handle: clones refer to the same session, so it
/// can be stored in a registry, moved into tasks, and closed from
/// anywhere.
///
/// ## Lifecycle
///
/// A session is created in [`SessionState::Created`] by a listener or
/// `dial`. Nothing runs until its owner calls [`start`](Self::start),
/// which launches the read loop and, in buffered mode, the write loop.
/// It ends in [`SessionState::Closed`] after a read error, a write error,
/// send-queue saturation, or an explicit [`close`](Self::close).
pub struct Session<P: Protocol> {
    pub(crate) inner: Arc<Inner<P>>,
}

impl<P: Protocol> Clone for Session<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: Protocol> Session<P> {
    /// Wraps an established connection. The session starts in
    /// [`SessionState::Created`]; call [`start`](Self::start) to run it.
    pub fn new(
        connection: Connection,
        id: SessionId,
        protocol: Arc<P>,
        handler: SharedHandler<P>,
        config: &SessionConfig,
    ) -> Self {
        let info = connection.info().clone();
        let (reader, writer) = connection.into_split();
        let queue = (config.send_queue_size > 0)
            .then(|| SendQueue::new(config.send_queue_size));

        Self {
            inner: Arc::new(Inner {
                id,
                info,
                state: AtomicU8::new(SessionState::Created as u8),
                protocol,
                handler,
                cancel: CancellationToken::new(),
                reader: Mutex::new(Some(reader)),
                writer: tokio::sync::Mutex::new(Some(writer)),
                queue,
                on_close: Mutex::new(None),
                on_send: RwLock::new(None),
            }),
        }
    }

    /// This session's unique ID.
    pub fn id(&self) -> SessionId {
        self.inner.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.inner.state.load(Ordering::Acquire))
    }

    /// Returns `true` once the session has been closed.
    pub fn is_closed(&self) -> bool {
        self.state() == SessionState::Closed
    }

    /// Addresses of the underlying connection.
    ///
    /// Reads and writes belong to the session's loops; this is for
    /// identifying the peer, not for touching the socket.
    pub fn connection(&self) -> &ConnectionInfo {
        &self.inner.info
    }

    /// The protocol this session speaks.
    pub fn protocol(&self) -> &P {
        &self.inner.protocol
    }

    /// Capacity of the send queue, or `None` in synchronous mode.
    pub fn send_queue_capacity(&self) -> Option<usize> {
        self.inner.queue.as_ref().map(SendQueue::capacity)
    }

    /// Launches the read loop and, in buffered mode, the write loop.
    ///
    /// Only the first call on a [`SessionState::Created`] session does
    /// anything; it returns `true`. Later calls, and calls on a closed
    /// session, return `false`. Must be called within a Tokio runtime.
    pub fn start(&self) -> bool {
        let claimed = self.inner.state.compare_exchange(
            SessionState::Created as u8,
            SessionState::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
        if claimed.is_err() {
            return false;
        }

        // A close racing with this start may already have dropped the
        // reader; the session is closed then and nothing needs to run.
        let reader = lock(&self.inner.reader).take();
        if let Some(reader) = reader {
            tokio::spawn(reader::read_loop(self.clone(), reader));
            if self.inner.queue.is_some() {
                tokio::spawn(pipeline::write_loop(self.clone()));
            }
            tracing::debug!(id = %self.id(), peer = %self.inner.info.peer, "session started");
        }
        true
    }

    /// Sends a message to the peer.
    ///
    /// In buffered mode this never waits: the message is queued, or the
    /// call fails with [`SessionError::SendQueueSaturated`] and the session
    /// closes. In synchronous mode the message is encoded and written
    /// before this returns; an encode or write failure closes the session.
    ///
    /// # Errors
    /// [`SessionError::Closed`] if the session is closed.
    pub async fn send(&self, message: P::Message) -> Result<(), SessionError> {
        match &self.inner.queue {
            Some(queue) => self.enqueue(queue, message),
            None => self.write_now(message).await,
        }
    }

    /// Closes the session.
    ///
    /// Safe to call from any task, any number of times, concurrently.
    /// Exactly one call performs the teardown and returns `Ok(())`:
    /// it cancels both loops, closes the send queue, releases the
    /// connection, and runs the close callback. Every other call returns
    /// [`SessionError::Closed`] without waiting.
    pub fn close(&self) -> Result<(), SessionError> {
        let previous = self
            .inner
            .state
            .swap(SessionState::Closed as u8, Ordering::AcqRel);
        if previous == SessionState::Closed as u8 {
            return Err(SessionError::Closed);
        }

        self.inner.cancel.cancel();
        if let Some(queue) = &self.inner.queue {
            queue.close();
        }
        // Halves still parked here are dropped now. A half owned by a
        // running loop, or by a sender holding the writer lock, is dropped
        // by that owner as soon as it sees the cancellation.
        lock(&self.inner.reader).take();
        if let Ok(mut writer) = self.inner.writer.try_lock() {
            writer.take();
        }

        tracing::debug!(id = %self.id(), "session closed");

        let callback = lock(&self.inner.on_close).take();
        if let Some(callback) = callback {
            callback(self);
        }
        Ok(())
    }

    /// Resolves once the session is closed.
    pub async fn closed(&self) {
        self.inner.cancel.cancelled().await;
    }

    /// Registers a callback to run once, when the session closes.
    ///
    /// Replaces any previous close callback. Ignored if the session is
    /// already closed.
    pub fn set_close_callback<F>(&self, callback: F)
    where
        F: FnOnce(&Session<P>) + Send + 'static,
    {
        let mut slot = lock(&self.inner.on_close);
        if !self.is_closed() {
            *slot = Some(Box::new(callback));
        }
    }

    /// Registers a callback to run after each message is successfully
    /// written to the connection. Replaces any previous send callback.
    pub fn set_send_callback<F>(&self, callback: F)
    where
        F: Fn(&Session<P>, &P::Message) + Send + Sync + 'static,
    {
        *self
            .inner
            .on_send
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Some(Arc::new(callback));
    }
}

impl<P: Protocol> fmt::Debug for Session<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.inner.id)
            .field("peer", &self.inner.info.peer)
            .field("state", &self.state())
            .finish()
    }
}

/// Locks a std mutex, recovering the data if a panicking thread poisoned
/// it. Every critical section here leaves the data consistent.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
