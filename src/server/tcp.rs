//! TCP transport adapter
//!
//! A peer opens a TCP connection and sends its stream identity as the first
//! line, then raw transport stream bytes:
//!
//! ```text
//! publish/foo/secret\n
//! <ts packets...>
//! ```
//!
//! A read that waits longer than the idle timeout fails with `TimedOut`,
//! so a publisher whose link vanished without a FIN frees its stream.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, BufReader, ReadBuf};
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{Instant, Sleep};

use super::config::ServerConfig;
use super::transport::{Acceptor, Transport};

/// Longest accepted identity line, excluding the terminator
pub const MAX_STREAM_ID_LEN: usize = 512;

/// Listening TCP socket
pub struct TcpAcceptor {
    listener: TcpListener,
    handshake_timeout: Duration,
    idle_timeout: Option<Duration>,
    nodelay: bool,
}

impl TcpAcceptor {
    pub async fn bind(addr: SocketAddr, config: &ServerConfig) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        Ok(Self {
            listener,
            handshake_timeout: config.handshake_timeout(),
            idle_timeout: config.idle_timeout(),
            nodelay: config.tcp_nodelay,
        })
    }
}

#[async_trait]
impl Acceptor for TcpAcceptor {
    type Conn = TcpConnection;

    /// Next connection whose socket could be configured
    ///
    /// A socket that fails configuration is dropped; only errors of the
    /// listening socket itself are returned.
    async fn accept(&mut self) -> io::Result<TcpConnection> {
        loop {
            let (socket, peer_addr) = self.listener.accept().await?;
            if let Err(e) = configure_socket(&socket, self.nodelay) {
                tracing::warn!(peer = %peer_addr, error = %e, "Failed to configure socket");
                continue;
            }
            return Ok(TcpConnection::new(socket, peer_addr, self.handshake_timeout)
                .with_idle_timeout(self.idle_timeout));
        }
    }

    fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }
}

fn configure_socket(socket: &TcpStream, nodelay: bool) -> io::Result<()> {
    if nodelay {
        socket.set_nodelay(true)?;
    }
    Ok(())
}

/// Accepted TCP connection
///
/// Reads go through the same buffer the identity line was read from, so
/// media bytes sent right behind the line are not lost.
pub struct TcpConnection {
    stream: BufReader<TcpStream>,
    peer_addr: SocketAddr,
    handshake_timeout: Duration,
    idle_timeout: Option<Duration>,
    /// Deadline of the read currently waiting, created on first use
    idle_deadline: Option<Pin<Box<Sleep>>>,
    idle_armed: bool,
}

impl TcpConnection {
    pub fn new(socket: TcpStream, peer_addr: SocketAddr, handshake_timeout: Duration) -> Self {
        Self {
            stream: BufReader::new(socket),
            peer_addr,
            handshake_timeout,
            idle_timeout: None,
            idle_deadline: None,
            idle_armed: false,
        }
    }

    /// Fail reads that see no data for `timeout`
    ///
    /// The clock starts when a read begins waiting, so time spent between
    /// reads (authentication, fan-out) never counts.
    pub fn with_idle_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.idle_timeout = timeout;
        self
    }
}

#[async_trait]
impl Transport for TcpConnection {
    async fn stream_id(&mut self) -> io::Result<String> {
        let mut line = Vec::with_capacity(64);
        let limit = MAX_STREAM_ID_LEN as u64 + 1;
        let mut limited = (&mut self.stream).take(limit);

        tokio::time::timeout(self.handshake_timeout, limited.read_until(b'\n', &mut line))
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, "stream id not received in time"))??;

        if line.last() != Some(&b'\n') {
            return Err(if line.len() > MAX_STREAM_ID_LEN {
                io::Error::new(io::ErrorKind::InvalidData, "stream id too long")
            } else {
                io::Error::new(io::ErrorKind::UnexpectedEof, "connection closed before stream id")
            });
        }
        line.pop();
        if line.last() == Some(&b'\r') {
            line.pop();
        }

        String::from_utf8(line).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))
    }

    fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

impl AsyncRead for TcpConnection {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let this = &mut *self;
        if let Poll::Ready(result) = Pin::new(&mut this.stream).poll_read(cx, buf) {
            this.idle_armed = false;
            return Poll::Ready(result);
        }

        let Some(timeout) = this.idle_timeout else {
            return Poll::Pending;
        };
        let deadline = Instant::now() + timeout;
        let sleep = this
            .idle_deadline
            .get_or_insert_with(|| Box::pin(tokio::time::sleep_until(deadline)));
        if !this.idle_armed {
            sleep.as_mut().reset(deadline);
            this.idle_armed = true;
        }

        match sleep.as_mut().poll(cx) {
            Poll::Ready(()) => {
                this.idle_armed = false;
                tracing::debug!(
                    peer = %this.peer_addr,
                    timeout_ms = timeout.as_millis() as u64,
                    "Peer idle, failing read"
                );
                Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::TimedOut,
                    "no data from peer within idle timeout",
                )))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

impl AsyncWrite for TcpConnection {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        Pin::new(&mut self.stream).poll_write(cx, buf)
    }

    fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_flush(cx)
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Pin::new(&mut self.stream).poll_shutdown(cx)
    }
}
