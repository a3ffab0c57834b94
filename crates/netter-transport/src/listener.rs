//! Socket-backed [`Acceptor`].

#[cfg(unix)]
use std::path::Path;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;

use crate::{Acceptor, Connection, Endpoint, Network, TransportError};

enum Inner {
    Tcp(TcpListener),
    #[cfg(unix)]
    Unix(UnixListener),
}

/// Accepts inbound connections on a bound address.
///
/// The socket is shared between `close` and any in-flight accept. Closing
/// cancels the token, which wakes a parked accept, and releases the
/// listener's hold on the socket; the socket itself is closed as soon as
/// the woken accept lets go of it. A unix listener also removes its
/// socket file, so the path can be bound again.
pub struct Listener {
    socket: Mutex<Option<Arc<Inner>>>,
    local: Endpoint,
    closed: CancellationToken,
}

impl Listener {
    /// Binds a listener to `addr` on the given network.
    ///
    /// For TCP, `addr` is a `host:port` string (`"127.0.0.1:0"` lets the
    /// OS pick a port). For unix sockets it is a filesystem path.
    pub async fn bind(
        network: Network,
        addr: &str,
    ) -> Result<Self, TransportError> {
        let (inner, local) = match network {
            Network::Tcp => {
                let l = TcpListener::bind(addr).await.map_err(TransportError::Bind)?;
                let local = Endpoint::Tcp(l.local_addr().map_err(TransportError::Bind)?);
                (Inner::Tcp(l), local)
            }
            #[cfg(unix)]
            Network::Unix => {
                let l = UnixListener::bind(addr).map_err(TransportError::Bind)?;
                let local = Endpoint::Unix(
                    l.local_addr()
                        .map_err(TransportError::Bind)?
                        .as_pathname()
                        .map(Path::to_path_buf),
                );
                (Inner::Unix(l), local)
            }
        };
        tracing::info!(%network, %local, "listening");
        Ok(Self {
            socket: Mutex::new(Some(Arc::new(inner))),
            local,
            closed: CancellationToken::new(),
        })
    }

    /// Returns the address the listener was bound to. Still available
    /// after close.
    pub fn local_endpoint(&self) -> Result<Endpoint, TransportError> {
        Ok(self.local.clone())
    }

    /// Returns `true` once [`close`](Acceptor::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    fn socket(&self) -> Option<Arc<Inner>> {
        self.socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    #[cfg(unix)]
    fn remove_socket_file(&self) {
        if let Endpoint::Unix(Some(path)) = &self.local {
            if let Err(e) = std::fs::remove_file(path) {
                tracing::debug!(path = %path.display(), error = %e, "could not remove socket file");
            }
        }
    }

    #[cfg(not(unix))]
    fn remove_socket_file(&self) {}

    /// Accepts until a connection can be wrapped. A socket that dies
    /// between accept and setup (e.g. reset before we read its peer
    /// address) is dropped and the next one accepted; only the accept
    /// call itself can fail the listener.
    async fn accept_raw(socket: &Inner) -> Result<Connection, TransportError> {
        loop {
            let wrapped = match socket {
                Inner::Tcp(l) => {
                    let (stream, _) =
                        l.accept().await.map_err(TransportError::Accept)?;
                    Connection::from_tcp(stream)
                }
                #[cfg(unix)]
                Inner::Unix(l) => {
                    let (stream, _) =
                        l.accept().await.map_err(TransportError::Accept)?;
                    Connection::from_unix(stream)
                }
            };
            match wrapped {
                Ok(conn) => return Ok(conn),
                Err(e) => {
                    tracing::debug!(error = %e, "dropping connection that failed setup");
                }
            }
        }
    }
}

impl Acceptor for Listener {
    async fn accept(&self) -> Result<Connection, TransportError> {
        let Some(socket) = self.socket() else {
            return Err(TransportError::Closed);
        };
        if self.closed.is_cancelled() {
            return Err(TransportError::Closed);
        }
        tokio::select! {
            biased;
            _ = self.closed.cancelled() => Err(TransportError::Closed),
            result = Self::accept_raw(&socket) => result,
        }
    }

    fn close(&self) {
        self.closed.cancel();
        let socket = self
            .socket
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(socket) = socket else {
            return;
        };
        drop(socket);
        self.remove_socket_file();
        tracing::info!(local = %self.local, "listener closed");
    }
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("local", &self.local)
            .field("closed", &self.is_closed())
            .finish()
    }
}
