//! Inbound half of a session: the decode/dispatch loop.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use bytes::BytesMut;
use futures_util::FutureExt;
use netter_protocol::Protocol;
use netter_transport::ConnectionReader;

use crate::{Session, SessionError};

/// Decodes messages until the protocol reports an error or the session is
/// cancelled, dispatching each one to the handler. Closes the session on
/// the way out.
pub(crate) async fn read_loop<P: Protocol>(
    session: Session<P>,
    mut reader: ConnectionReader,
) {
    // Bytes read but not yet consumed by a complete message carry over
    // from one decode call to the next.
    let mut retained = BytesMut::new();

    loop {
        let decoded = tokio::select! {
            biased;
            _ = session.inner.cancel.cancelled() => break,
            decoded = session.inner.protocol.decode(&mut reader, &mut retained) => decoded,
        };

        match decoded {
            Ok(Some(message)) => session.dispatch(message).await,
            Ok(None) => continue,
            Err(e) => {
                let e = SessionError::Decode(Box::new(e));
                tracing::debug!(id = %session.id(), error = %e, "read loop ended");
                break;
            }
        }
    }

    drop(reader);
    let _ = session.close();
    tracing::trace!(id = %session.id(), "read loop exited");
}

impl<P: Protocol> Session<P> {
    /// Runs the handler on one message, containing any panic.
    async fn dispatch(&self, message: P::Message) {
        let handler = Arc::clone(&self.inner.handler);
        // Building the handler's future inside the guarded block means a
        // panic while constructing it is caught too.
        let outcome = AssertUnwindSafe(async {
            handler.handle_boxed(self, message).await;
        })
        .catch_unwind()
        .await;

        if let Err(panic) = outcome {
            tracing::error!(
                id = %self.id(),
                panic = panic_message(panic.as_ref()),
                "handler panicked; message dropped"
            );
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}
