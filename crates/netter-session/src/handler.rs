//! The capability that consumes decoded inbound messages.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use futures_util::future::BoxFuture;
use netter_protocol::Protocol;

use crate::Session;

/// Receives every message a session's read loop decodes.
///
/// `handle` is awaited before the read loop decodes the next message, so
/// messages from one session are handled one at a time, in arrival order.
/// A panic inside `handle` is caught by the read loop, logged, and the
/// message dropped; the session keeps running.
///
/// ```rust,ignore
/// struct Echo;
///
/// impl Handler<LengthDelimited> for Echo {
///     async fn handle(&self, session: &Session<LengthDelimited>, msg: Bytes) {
///         let _ = session.send(msg).await;
///     }
/// }
/// ```
///
/// For a plain closure, see [`handler_fn`].
pub trait Handler<P: Protocol>: Send + Sync + 'static {
    /// Handles one decoded message.
    fn handle(
        &self,
        session: &Session<P>,
        message: P::Message,
    ) -> impl Future<Output = ()> + Send;
}

/// Object-safe form of [`Handler`], implemented for every handler.
///
/// Sessions store their handler as a [`SharedHandler`] so that one session
/// type serves any handler; there is no need to implement this directly.
pub trait DynHandler<P: Protocol>: Send + Sync + 'static {
    /// Boxes the future returned by [`Handler::handle`].
    fn handle_boxed<'a>(
        &'a self,
        session: &'a Session<P>,
        message: P::Message,
    ) -> BoxFuture<'a, ()>;
}

impl<P: Protocol, H: Handler<P>> DynHandler<P> for H {
    fn handle_boxed<'a>(
        &'a self,
        session: &'a Session<P>,
        message: P::Message,
    ) -> BoxFuture<'a, ()> {
        Box::pin(self.handle(session, message))
    }
}

/// A handler shared by every session a listener creates.
pub type SharedHandler<P> = Arc<dyn DynHandler<P>>;

/// A [`Handler`] backed by a closure. Created by [`handler_fn`].
pub struct HandlerFn<P, F> {
    f: F,
    _protocol: PhantomData<fn() -> P>,
}

/// Wraps a closure as a [`Handler`].
///
/// ```rust,ignore
/// let handler = handler_fn(|session: &Session<LengthDelimited>, msg: Bytes| {
///     tracing::info!(id = %session.id(), len = msg.len(), "received");
/// });
/// ```
pub fn handler_fn<P, F>(f: F) -> HandlerFn<P, F>
where
    P: Protocol,
    F: Fn(&Session<P>, P::Message) + Send + Sync + 'static,
{
    HandlerFn {
        f,
        _protocol: PhantomData,
    }
}

impl<P, F> Handler<P> for HandlerFn<P, F>
where
    P: Protocol,
    F: Fn(&Session<P>, P::Message) + Send + Sync + 'static,
{
    fn handle(
        &self,
        session: &Session<P>,
        message: P::Message,
    ) -> impl Future<Output = ()> + Send {
        // Run the closure when polled, not when the future is built, so a
        // panic surfaces inside the read loop's unwind guard.
        async move { (self.f)(session, message) }
    }
}

impl<P, F> fmt::Debug for HandlerFn<P, F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("HandlerFn")
    }
}
