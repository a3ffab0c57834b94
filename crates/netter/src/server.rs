//! The accept loop, its builder, and the `listen` / `dial` entry points.
//!
//! A [`Server`] turns every connection its [`Acceptor`] produces into a
//! [`Session`] and hands it to the caller, who decides when to start it.

use std::fmt;
use std::sync::Arc;

use netter_protocol::Protocol;
use netter_session::{
    Handler, Session, SessionConfig, SessionIdGenerator, SharedHandler,
};
use netter_transport::{Acceptor, Connection, Endpoint, Listener, Network};

use crate::NetterError;
use crate::backoff::{Backoff, BackoffConfig};

// ---------------------------------------------------------------------------
// ServerConfig
// ---------------------------------------------------------------------------

/// Settings for a [`Server`].
#[derive(Debug, Clone, Default)]
pub struct ServerConfig {
    /// Applied to every accepted session.
    pub session: SessionConfig,
    /// Pacing of retries after transient accept errors.
    pub backoff: BackoffConfig,
}

// ---------------------------------------------------------------------------
// Server
// ---------------------------------------------------------------------------

/// Accepts connections and wraps each one in a [`Session`].
///
/// Every session shares the server's protocol and handler and gets an ID
/// from the server's own generator, so IDs are strictly increasing in
/// accept order.
///
/// The server is generic over its [`Acceptor`]; [`Listener`] is the
/// socket-backed default. Wrap it in an `Arc` to call
/// [`close`](Self::close) while another task is inside
/// [`run`](Self::run).
pub struct Server<P: Protocol, A: Acceptor = Listener> {
    acceptor: A,
    protocol: Arc<P>,
    handler: SharedHandler<P>,
    config: ServerConfig,
    ids: SessionIdGenerator,
}

impl<P: Protocol, A: Acceptor> Server<P, A> {
    /// Creates a server over an existing acceptor.
    pub fn new(
        acceptor: A,
        protocol: P,
        handler: impl Handler<P>,
        config: ServerConfig,
    ) -> Self {
        Self {
            acceptor,
            protocol: Arc::new(protocol),
            handler: Arc::new(handler),
            config,
            ids: SessionIdGenerator::new(),
        }
    }

    /// The underlying acceptor.
    pub fn acceptor(&self) -> &A {
        &self.acceptor
    }

    /// The settings this server was built with.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Runs the accept loop.
    ///
    /// Each accepted connection becomes a new session in the `Created`
    /// state, passed to `on_accept` before the next accept. `on_accept`
    /// owns the session: it must call [`Session::start`] (directly or from
    /// a task it spawns) for the session to do anything.
    ///
    /// Transient accept errors are retried after a backoff delay. The loop
    /// ends with:
    ///
    /// - `Ok(())` once the acceptor is closed;
    /// - `Err(_)` on a permanent accept error, or when the configured retry
    ///   ceiling is reached.
    pub async fn run<F>(&self, mut on_accept: F) -> Result<(), NetterError>
    where
        F: FnMut(Session<P>),
    {
        let mut backoff = Backoff::new(self.config.backoff.clone());
        tracing::info!("accept loop running");

        loop {
            let err = match self.acceptor.accept().await {
                Ok(connection) => {
                    backoff.reset();
                    let session = self.session_for(connection);
                    tracing::debug!(
                        id = %session.id(),
                        peer = %session.connection().peer,
                        "accepted connection"
                    );
                    on_accept(session);
                    continue;
                }
                Err(e) => e,
            };

            if err.is_closed() {
                tracing::info!("listener closed, accept loop stopping");
                return Ok(());
            }
            if !err.is_transient() {
                tracing::error!(error = %err, "accept failed");
                return Err(err.into());
            }

            let Some(delay) = backoff.next_delay() else {
                tracing::error!(
                    error = %err,
                    attempts = backoff.attempts(),
                    "accept still failing, giving up"
                );
                return Err(err.into());
            };
            tracing::warn!(
                error = %err,
                delay_ms = delay.as_millis() as u64,
                "transient accept error, retrying"
            );
            tokio::time::sleep(delay).await;
        }
    }

    /// Stops the accept loop. A pending accept is interrupted and
    /// [`run`](Self::run) returns `Ok(())`. Sessions already handed out
    /// are unaffected. Idempotent.
    pub fn close(&self) {
        self.acceptor.close();
    }

    fn session_for(&self, connection: Connection) -> Session<P> {
        Session::new(
            connection,
            self.ids.next_id(),
            Arc::clone(&self.protocol),
            Arc::clone(&self.handler),
            &self.config.session,
        )
    }
}

impl<P: Protocol> Server<P, Listener> {
    /// Returns the address the server is listening on.
    pub fn local_endpoint(&self) -> Result<Endpoint, NetterError> {
        Ok(self.acceptor.local_endpoint()?)
    }
}

impl<P: Protocol, A: Acceptor> fmt::Debug for Server<P, A> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Server")
            .field("config", &self.config)
            .field("id_origin", &self.ids.origin())
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ServerBuilder
// ---------------------------------------------------------------------------

/// Builder for a socket-backed [`Server`].
///
/// ```rust,ignore
/// let server = ServerBuilder::new()
///     .bind("0.0.0.0:7000")
///     .send_queue_size(64)
///     .build(LengthDelimited::new(), handler)
///     .await?;
/// server.run(|session| { session.start(); }).await?;
/// ```
#[derive(Debug, Clone)]
pub struct ServerBuilder {
    network: Network,
    addr: String,
    config: ServerConfig,
}

impl ServerBuilder {
    /// Creates a builder for TCP on `127.0.0.1:7000`, synchronous sends,
    /// and default backoff.
    pub fn new() -> Self {
        Self {
            network: Network::Tcp,
            addr: "127.0.0.1:7000".to_string(),
            config: ServerConfig::default(),
        }
    }

    /// Sets the network to listen on.
    pub fn network(mut self, network: Network) -> Self {
        self.network = network;
        self
    }

    /// Sets the address (or unix socket path) to bind.
    pub fn bind(mut self, addr: &str) -> Self {
        self.addr = addr.to_string();
        self
    }

    /// Sets the send queue capacity of accepted sessions. `0` selects
    /// synchronous sends.
    pub fn send_queue_size(mut self, size: usize) -> Self {
        self.config.session.send_queue_size = size;
        self
    }

    /// Sets the accept retry pacing.
    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.config.backoff = backoff;
        self
    }

    /// Binds the listener and returns the server, not yet accepting.
    pub async fn build<P: Protocol>(
        self,
        protocol: P,
        handler: impl Handler<P>,
    ) -> Result<Server<P>, NetterError> {
        let listener = Listener::bind(self.network, &self.addr).await?;
        Ok(Server::new(listener, protocol, handler, self.config))
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// listen / dial
// ---------------------------------------------------------------------------

/// Binds `addr` and returns a server whose sessions speak `protocol` and
/// dispatch to `handler`. Call [`Server::run`] to start accepting.
pub async fn listen<P: Protocol>(
    network: Network,
    addr: &str,
    protocol: P,
    handler: impl Handler<P>,
    send_queue_size: usize,
) -> Result<Server<P>, NetterError> {
    ServerBuilder::new()
        .network(network)
        .bind(addr)
        .send_queue_size(send_queue_size)
        .build(protocol, handler)
        .await
}

/// Connects to `addr` and returns a started session.
///
/// The session behaves exactly like an accepted one: inbound messages go
/// to `handler`, and [`Session::send`] follows the mode selected by
/// `send_queue_size`. Nothing reconnects if the session later closes.
pub async fn dial<P: Protocol>(
    network: Network,
    addr: &str,
    protocol: P,
    handler: impl Handler<P>,
    send_queue_size: usize,
) -> Result<Session<P>, NetterError> {
    let connection = Connection::connect(network, addr).await?;
    let session = Session::new(
        connection,
        SessionIdGenerator::new().next_id(),
        Arc::new(protocol),
        Arc::new(handler),
        &SessionConfig::buffered(send_queue_size),
    );
    session.start();
    Ok(session)
}
