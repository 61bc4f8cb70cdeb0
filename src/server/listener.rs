//! Relay server listener
//!
//! Resolves the configured address, runs one accept loop per resolved
//! address and spawns a task per accepted connection.

use std::collections::HashSet;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

use crate::auth::Authenticator;
use crate::error::Result;
use crate::registry::{Relay, RelayConfig};
use crate::server::config::ServerConfig;
use crate::server::connection::Connection;
use crate::server::tcp::TcpAcceptor;
use crate::server::transport::{Acceptor, Transport};
use crate::stats::{ServerStats, StreamStatistics};

/// Pause after a failed accept
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Relay server
///
/// Cheap to clone; clones share the registry and counters.
#[derive(Clone)]
pub struct RelayServer {
    config: Arc<ServerConfig>,
    relay: Arc<Relay>,
    auth: Arc<dyn Authenticator>,
    next_session_id: Arc<AtomicU64>,
    total_connections: Arc<AtomicU64>,
    active_connections: Arc<AtomicU64>,
    connection_semaphore: Option<Arc<Semaphore>>,
    started_at: Instant,
}

impl RelayServer {
    /// Create a new server with the given configuration and authenticator
    pub fn new(config: ServerConfig, relay_config: RelayConfig, auth: Arc<dyn Authenticator>) -> Self {
        Self::with_relay(config, Arc::new(Relay::with_config(relay_config)), auth)
    }

    /// Create a new server around an existing registry
    pub fn with_relay(config: ServerConfig, relay: Arc<Relay>, auth: Arc<dyn Authenticator>) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };

        Self {
            config: Arc::new(config),
            relay,
            auth,
            next_session_id: Arc::new(AtomicU64::new(1)),
            total_connections: Arc::new(AtomicU64::new(0)),
            active_connections: Arc::new(AtomicU64::new(0)),
            connection_semaphore,
            started_at: Instant::now(),
        }
    }

    /// Get a reference to the stream registry
    pub fn relay(&self) -> &Arc<Relay> {
        &self.relay
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Bind a TCP listener on every address the configured host resolves to
    ///
    /// Accept loops run in the background until `cancel` fires. Returns the
    /// bound addresses.
    pub async fn listen(&self, cancel: CancellationToken) -> Result<Vec<SocketAddr>> {
        let address = if self.config.address.starts_with(':') {
            format!("localhost{}", self.config.address)
        } else {
            self.config.address.clone()
        };

        let mut seen = HashSet::new();
        let addrs: Vec<SocketAddr> = tokio::net::lookup_host(address.as_str())
            .await?
            .filter(|addr| seen.insert(*addr))
            .collect();
        if addrs.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("{} did not resolve to any address", address),
            )
            .into());
        }

        let mut bound = Vec::with_capacity(addrs.len());
        for addr in addrs {
            let acceptor = TcpAcceptor::bind(addr, &self.config).await?;
            bound.push(acceptor.local_addr()?);

            let server = self.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                if let Err(e) = server.serve(acceptor, cancel).await {
                    tracing::error!(addr = %addr, error = %e, "Listener stopped");
                }
            });
        }

        Ok(bound)
    }

    /// Accept connections from `acceptor` until `cancel` fires
    ///
    /// Accept errors are logged and the loop keeps going. Connections
    /// already being handled keep running after cancellation.
    pub async fn serve<A: Acceptor>(&self, mut acceptor: A, cancel: CancellationToken) -> Result<()> {
        let local_addr = acceptor.local_addr()?;
        tracing::info!(addr = %local_addr, "Relay server listening");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(addr = %local_addr, "Shutdown signal received");
                    return Ok(());
                }
                accepted = acceptor.accept() => match accepted {
                    Ok(conn) => self.handle_connection(conn),
                    Err(e) => {
                        tracing::error!(addr = %local_addr, error = %e, "Failed to accept connection");
                        // Back off so a persistent error (e.g. out of descriptors) does not spin
                        tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                    }
                },
            }
        }
    }

    fn handle_connection<T: Transport>(&self, transport: T) {
        let peer_addr = transport.peer_addr();

        // Check connection limit
        let permit = match &self.connection_semaphore {
            Some(sem) => match Arc::clone(sem).try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            },
            None => None,
        };

        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        self.total_connections.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(session_id = session_id, peer = %peer_addr, "New connection");

        let mut connection = Connection::new(
            session_id,
            transport,
            Arc::clone(&self.config),
            Arc::clone(&self.relay),
            Arc::clone(&self.auth),
        );
        let active = Arc::clone(&self.active_connections);

        tokio::spawn(async move {
            let _permit = permit;

            if let Err(e) = connection.run().await {
                tracing::debug!(session_id = session_id, error = %e, "Connection error");
            }

            active.fetch_sub(1, Ordering::Relaxed);
        });
    }

    /// Stream statistics with playback URLs filled in
    pub fn statistics(&self) -> Vec<StreamStatistics> {
        let address = self.config.advertised_address();

        self.relay
            .statistics()
            .into_iter()
            .map(|mut stats| {
                stats.url = Some(format!("srt://{}?streamid=play/{}", address, stats.name));
                stats
            })
            .collect()
    }

    pub fn server_stats(&self) -> ServerStats {
        ServerStats {
            total_connections: self.total_connections.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
            active_streams: self.relay.stream_count() as u64,
            uptime_secs: self.started_at.elapsed().as_secs(),
        }
    }
}

impl std::fmt::Debug for RelayServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelayServer")
            .field("address", &self.config.address)
            .field("streams", &self.relay.stream_count())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::AllowAll;
    use crate::server::tcp::TcpConnection;
    use async_trait::async_trait;
    use tokio::io::AsyncWriteExt;
    use tokio::net::{TcpListener, TcpStream};
    use tokio::sync::mpsc;

    /// Hands out whatever the test pushes, then waits forever
    struct ScriptedAcceptor {
        local_addr: SocketAddr,
        accepted: mpsc::UnboundedReceiver<io::Result<TcpConnection>>,
    }

    #[async_trait]
    impl Acceptor for ScriptedAcceptor {
        type Conn = TcpConnection;

        async fn accept(&mut self) -> io::Result<TcpConnection> {
            match self.accepted.recv().await {
                Some(result) => result,
                None => std::future::pending().await,
            }
        }

        fn local_addr(&self) -> io::Result<SocketAddr> {
            Ok(self.local_addr)
        }
    }

    /// A connected client and the server side wrapped for the relay
    async fn tcp_pair() -> (TcpStream, TcpConnection) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        let (socket, peer_addr) = listener.accept().await.unwrap();
        (
            client,
            TcpConnection::new(socket, peer_addr, Duration::from_secs(1)),
        )
    }

    fn server(config: ServerConfig) -> RelayServer {
        RelayServer::new(config, RelayConfig::default(), Arc::new(AllowAll))
    }

    #[test]
    fn test_statistics_urls() {
        let server = server(
            ServerConfig::with_address("0.0.0.0:1337").public_address("relay.example.com:1337"),
        );
        let _publisher = server.relay().publish("foo").unwrap();

        let stats = server.statistics();
        assert_eq!(stats.len(), 1);
        assert_eq!(
            stats[0].url.as_deref(),
            Some("srt://relay.example.com:1337?streamid=play/foo")
        );
    }

    #[test]
    fn test_server_stats_initial() {
        let server = server(ServerConfig::default());
        let stats = server.server_stats();
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.active_connections, 0);
        assert_eq!(stats.active_streams, 0);
    }

    #[tokio::test]
    async fn test_listen_and_cancel() {
        let server = server(ServerConfig::with_address("127.0.0.1:0"));
        let cancel = CancellationToken::new();

        let addrs = server.listen(cancel.clone()).await.unwrap();
        assert_eq!(addrs.len(), 1);
        assert_ne!(addrs[0].port(), 0);

        cancel.cancel();
        // Listener socket is released once the accept loop exits
        let mut rebound = false;
        for _ in 0..50 {
            if tokio::net::TcpListener::bind(addrs[0]).await.is_ok() {
                rebound = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(rebound);
    }

    #[tokio::test]
    async fn test_accept_error_keeps_listener_running() {
        let server = server(ServerConfig::default());
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let acceptor = ScriptedAcceptor {
            local_addr: "127.0.0.1:1337".parse().unwrap(),
            accepted: rx,
        };

        let serving = tokio::spawn({
            let server = server.clone();
            let cancel = cancel.clone();
            async move { server.serve(acceptor, cancel).await }
        });

        tx.send(Err(io::Error::new(io::ErrorKind::ConnectionAborted, "peer gone")))
            .unwrap();
        tx.send(Err(io::Error::new(io::ErrorKind::InvalidInput, "setsockopt failed")))
            .unwrap();

        let (mut client, conn) = tcp_pair().await;
        client.write_all(b"publish/foo\n").await.unwrap();
        tx.send(Ok(conn)).unwrap();

        tokio::time::timeout(Duration::from_secs(2), async {
            while !server.relay().has_active_stream("foo") {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("connection after accept errors was not served");
        assert_eq!(server.server_stats().total_connections, 1);
        assert!(!serving.is_finished());

        cancel.cancel();
        assert!(serving.await.unwrap().is_ok());
    }

    #[tokio::test]
    async fn test_unresolvable_address() {
        let server = server(ServerConfig::with_address("not-an-address"));
        assert!(server.listen(CancellationToken::new()).await.is_err());
    }
}
