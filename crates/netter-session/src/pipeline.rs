//! Outbound half of a session: the send queue and the write loop.

use std::sync::{Mutex, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use bytes::Bytes;
use netter_protocol::Protocol;
use netter_transport::ConnectionWriter;
use tokio::sync::MutexGuard;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::session::lock;
use crate::{Session, SessionError};

/// Bounded FIFO between senders and the write loop.
///
/// The sender side sits behind a read-write lock: producers enqueue under
/// the read lock, and only the winning `close` takes the write lock to drop
/// it. A producer therefore never sends into a queue that is being closed,
/// and nothing but `close` ever closes it.
pub(crate) struct SendQueue<M> {
    capacity: usize,
    tx: RwLock<Option<mpsc::Sender<M>>>,
    /// Parked here until the write loop takes it.
    rx: Mutex<Option<mpsc::Receiver<M>>>,
}

impl<M> SendQueue<M> {
    pub(crate) fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            capacity,
            tx: RwLock::new(Some(tx)),
            rx: Mutex::new(Some(rx)),
        }
    }

    pub(crate) fn capacity(&self) -> usize {
        self.capacity
    }

    /// Drops both ends still held here. Only called from the winning close.
    pub(crate) fn close(&self) {
        write_lock(&self.tx).take();
        lock(&self.rx).take();
    }
}

impl<P: Protocol> Session<P> {
    /// Buffered-mode send: enqueue or fail, never wait.
    pub(crate) fn enqueue(
        &self,
        queue: &SendQueue<P::Message>,
        message: P::Message,
    ) -> Result<(), SessionError> {
        let result = {
            let tx = read_lock(&queue.tx);
            match tx.as_ref() {
                Some(tx) if !self.is_closed() => tx.try_send(message),
                _ => return Err(SessionError::Closed),
            }
        };

        match result {
            Ok(()) => Ok(()),
            Err(TrySendError::Full(_)) => {
                tracing::warn!(
                    id = %self.id(),
                    capacity = queue.capacity(),
                    "send queue saturated, closing session"
                );
                let _ = self.close();
                Err(SessionError::SendQueueSaturated)
            }
            // The write loop is gone, which only happens once closing.
            Err(TrySendError::Closed(_)) => Err(SessionError::Closed),
        }
    }

    /// Synchronous-mode send: encode and write under the writer lock.
    pub(crate) async fn write_now(
        &self,
        message: P::Message,
    ) -> Result<(), SessionError> {
        let mut guard = self.inner.writer.lock().await;
        if self.is_closed() {
            // close() could not reach the writer while we were queued for
            // the lock; release it on its behalf.
            guard.take();
            return Err(SessionError::Closed);
        }
        let Some(writer) = guard.as_mut() else {
            return Err(SessionError::Closed);
        };

        let encoded = self.encode(&message);
        let result = match encoded {
            Ok(bytes) => self.write_bytes(writer, &bytes).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                self.release_writer(guard);
                self.notify_sent(&message);
                Ok(())
            }
            Err(e) => {
                guard.take();
                drop(guard);
                if !matches!(e, SessionError::Closed) {
                    tracing::debug!(id = %self.id(), error = %e, "send failed, closing session");
                }
                let _ = self.close();
                Err(e)
            }
        }
    }

    /// Gives the writer back after a successful synchronous send.
    ///
    /// `close` cannot reach a writer whose lock is held, so if the session
    /// closed while we held it, the writer is dropped here instead. The
    /// second check covers a close that landed between the first check
    /// and the unlock; if the lock is taken by then, the new holder checks
    /// for itself.
    fn release_writer(&self, mut guard: MutexGuard<'_, Option<ConnectionWriter>>) {
        if self.is_closed() {
            guard.take();
        }
        drop(guard);
        if self.is_closed() {
            if let Ok(mut writer) = self.inner.writer.try_lock() {
                writer.take();
            }
        }
    }

    fn encode(&self, message: &P::Message) -> Result<Bytes, SessionError> {
        self.inner
            .protocol
            .encode(message)
            .map_err(|e| SessionError::Encode(Box::new(e)))
    }

    /// Writes one encoded message, giving up as soon as the session is
    /// cancelled.
    async fn write_bytes(
        &self,
        writer: &mut ConnectionWriter,
        bytes: &Bytes,
    ) -> Result<(), SessionError> {
        tokio::select! {
            biased;
            _ = self.inner.cancel.cancelled() => Err(SessionError::Closed),
            result = self.inner.protocol.write(writer, bytes) => {
                result.map_err(|e| SessionError::Write(Box::new(e)))
            }
        }
    }

    fn notify_sent(&self, message: &P::Message) {
        let callback = read_lock(&self.inner.on_send).clone();
        if let Some(callback) = callback {
            callback(self, message);
        }
    }
}

/// Drains the send queue until it is closed, cancelled, or a message fails
/// to encode or write. Closes the session on the way out.
pub(crate) async fn write_loop<P: Protocol>(session: Session<P>) {
    let Some(queue) = session.inner.queue.as_ref() else {
        return;
    };
    let rx = lock(&queue.rx).take();
    let writer = session.inner.writer.lock().await.take();
    let (Some(mut rx), Some(mut writer)) = (rx, writer) else {
        // Closed before the loop got going.
        let _ = session.close();
        return;
    };

    loop {
        // Cancellation wins over queued messages: nothing is written once
        // the session is closing.
        let message = tokio::select! {
            biased;
            _ = session.inner.cancel.cancelled() => break,
            message = rx.recv() => match message {
                Some(message) => message,
                None => break,
            },
        };

        let encoded = session.encode(&message);
        let result = match encoded {
            Ok(bytes) => session.write_bytes(&mut writer, &bytes).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            if !matches!(e, SessionError::Closed) {
                tracing::debug!(id = %session.id(), error = %e, "write loop failed");
            }
            break;
        }
        session.notify_sent(&message);
    }

    drop(writer);
    let _ = session.close();
    tracing::trace!(id = %session.id(), "write loop exited");
}

fn read_lock<T>(rw: &RwLock<T>) -> RwLockReadGuard<'_, T> {
    rw.read().unwrap_or_else(PoisonError::into_inner)
}

fn write_lock<T>(rw: &RwLock<T>) -> RwLockWriteGuard<'_, T> {
    rw.write().unwrap_or_else(PoisonError::into_inner)
}
