//! Established connections and their read/write halves.

use std::fmt;
use std::io;
use std::pin::Pin;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;
use tokio::net::tcp;
#[cfg(unix)]
use tokio::net::{UnixStream, unix};

use crate::{ConnectionInfo, Endpoint, Network, TransportError};

enum Stream {
    Tcp(TcpStream),
    #[cfg(unix)]
    Unix(UnixStream),
}

/// One established, bidirectional byte stream (TCP or unix).
///
/// A connection is used in two halves: [`into_split`](Self::into_split)
/// yields a reader and a writer that can be moved into separate tasks.
/// The underlying socket is closed once both halves are dropped.
pub struct Connection {
    stream: Stream,
    info: ConnectionInfo,
}

impl Connection {
    /// Dials `addr` over the given network.
    pub async fn connect(
        network: Network,
        addr: &str,
    ) -> Result<Self, TransportError> {
        let conn = match network {
            Network::Tcp => {
                let stream = TcpStream::connect(addr)
                    .await
                    .map_err(TransportError::Connect)?;
                Self::from_tcp(stream).map_err(TransportError::Connect)?
            }
            #[cfg(unix)]
            Network::Unix => {
                let stream = UnixStream::connect(addr)
                    .await
                    .map_err(TransportError::Connect)?;
                Self::from_unix(stream).map_err(TransportError::Connect)?
            }
        };
        tracing::debug!(%network, peer = %conn.info.peer, "connected");
        Ok(conn)
    }

    /// Wraps an established TCP stream. Disables Nagle's algorithm, since
    /// sessions write whole encoded messages at a time.
    pub fn from_tcp(stream: TcpStream) -> io::Result<Self> {
        stream.set_nodelay(true)?;
        let info = ConnectionInfo {
            local: Endpoint::Tcp(stream.local_addr()?),
            peer: Endpoint::Tcp(stream.peer_addr()?),
        };
        Ok(Self {
            stream: Stream::Tcp(stream),
            info,
        })
    }

    /// Wraps an established unix stream.
    #[cfg(unix)]
    pub fn from_unix(stream: UnixStream) -> io::Result<Self> {
        let info = ConnectionInfo {
            local: unix_endpoint(&stream.local_addr()?),
            peer: unix_endpoint(&stream.peer_addr()?),
        };
        Ok(Self {
            stream: Stream::Unix(stream),
            info,
        })
    }

    /// Creates two connected unix sockets. Useful for wiring a client and
    /// a server session together inside one process.
    #[cfg(unix)]
    pub fn pair() -> io::Result<(Self, Self)> {
        let (a, b) = UnixStream::pair()?;
        Ok((Self::from_unix(a)?, Self::from_unix(b)?))
    }

    /// Addresses of both sides.
    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    /// Splits the connection into independently owned halves.
    pub fn into_split(self) -> (ConnectionReader, ConnectionWriter) {
        match self.stream {
            Stream::Tcp(s) => {
                let (r, w) = s.into_split();
                (
                    ConnectionReader(ReadInner::Tcp(r)),
                    ConnectionWriter(WriteInner::Tcp(w)),
                )
            }
            #[cfg(unix)]
            Stream::Unix(s) => {
                let (r, w) = s.into_split();
                (
                    ConnectionReader(ReadInner::Unix(r)),
                    ConnectionWriter(WriteInner::Unix(w)),
                )
            }
        }
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("local", &self.info.local)
            .field("peer", &self.info.peer)
            .finish()
    }
}

#[cfg(unix)]
fn unix_endpoint(addr: &unix::SocketAddr) -> Endpoint {
    Endpoint::Unix(addr.as_pathname().map(|p| p.to_path_buf()))
}

// ---------------------------------------------------------------------------
// Halves
// ---------------------------------------------------------------------------

enum ReadInner {
    Tcp(tcp::OwnedReadHalf),
    #[cfg(unix)]
    Unix(unix::OwnedReadHalf),
}

enum WriteInner {
    Tcp(tcp::OwnedWriteHalf),
    #[cfg(unix)]
    Unix(unix::OwnedWriteHalf),
}

/// The read half of a [`Connection`].
pub struct ConnectionReader(ReadInner);

/// The write half of a [`Connection`]. Dropping it shuts down the write
/// direction of the stream.
pub struct ConnectionWriter(WriteInner);

impl fmt::Debug for ConnectionReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ConnectionReader")
    }
}

impl fmt::Debug for ConnectionWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("ConnectionWriter")
    }
}

impl AsyncRead for ConnectionReader {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.get_mut().0 {
            ReadInner::Tcp(r) => Pin::new(r).poll_read(cx, buf),
            #[cfg(unix)]
            ReadInner::Unix(r) => Pin::new(r).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ConnectionWriter {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match &mut self.get_mut().0 {
            WriteInner::Tcp(w) => Pin::new(w).poll_write(cx, buf),
            #[cfg(unix)]
            WriteInner::Unix(w) => Pin::new(w).poll_write(cx, buf),
        }
    }

    fn poll_flush(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.get_mut().0 {
            WriteInner::Tcp(w) => Pin::new(w).poll_flush(cx),
            #[cfg(unix)]
            WriteInner::Unix(w) => Pin::new(w).poll_flush(cx),
        }
    }

    fn poll_shutdown(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<io::Result<()>> {
        match &mut self.get_mut().0 {
            WriteInner::Tcp(w) => Pin::new(w).poll_shutdown(cx),
            #[cfg(unix)]
            WriteInner::Unix(w) => Pin::new(w).poll_shutdown(cx),
        }
    }
}
