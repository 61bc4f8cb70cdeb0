//! Transport boundary
//!
//! The relay core only needs a byte stream with a peer address and a
//! stream identity string available right after accept. Transport options
//! (latency, congestion control, encryption) belong to the adapter.

use std::io;
use std::net::SocketAddr;

use async_trait::async_trait;
use tokio::io::{AsyncRead, AsyncWrite};

/// An accepted media connection
#[async_trait]
pub trait Transport: AsyncRead + AsyncWrite + Unpin + Send + 'static {
    /// Identity string announced by the peer
    ///
    /// Called once per connection, before any media is read.
    async fn stream_id(&mut self) -> io::Result<String>;

    fn peer_addr(&self) -> SocketAddr;
}

/// Source of accepted connections for one listening address
#[async_trait]
pub trait Acceptor: Send + 'static {
    type Conn: Transport;

    async fn accept(&mut self) -> io::Result<Self::Conn>;

    fn local_addr(&self) -> io::Result<SocketAddr>;
}
