//! Per-connection handling
//!
//! Drives one accepted transport through identity parsing, authentication
//! and then either the publish loop or the play loop. Registry handles are
//! released when they go out of scope, so every exit path tears down.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

use crate::auth::{authorize, Authenticator};
use crate::error::Result;
use crate::media::SyncFinder;
use crate::registry::{Relay, Subscription};
use crate::server::config::ServerConfig;
use crate::server::transport::Transport;
use crate::session::{IdentityParser, Intent, SessionState, StreamIdentity};

/// Minimum time between "late viewer" warnings on one connection
const LATE_WARNING_INTERVAL: Duration = Duration::from_secs(5);

/// A single relay connection
pub struct Connection<T: Transport> {
    transport: T,
    session: SessionState,
    config: Arc<ServerConfig>,
    relay: Arc<Relay>,
    auth: Arc<dyn Authenticator>,
    parser: IdentityParser,
}

impl<T: Transport> Connection<T> {
    pub fn new(
        session_id: u64,
        transport: T,
        config: Arc<ServerConfig>,
        relay: Arc<Relay>,
        auth: Arc<dyn Authenticator>,
    ) -> Self {
        let peer_addr = transport.peer_addr();
        let parser = IdentityParser::new(config.credential_key.clone());

        Self {
            transport,
            session: SessionState::new(session_id, peer_addr),
            config,
            relay,
            auth,
            parser,
        }
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    /// Run the connection to completion
    ///
    /// The transport is closed when the connection is dropped.
    pub async fn run(&mut self) -> Result<()> {
        let result = self.handle().await;
        self.session.close();

        tracing::info!(
            session_id = self.session.id,
            peer = %self.session.peer_addr,
            stream = self.session.stream_name().unwrap_or("-"),
            bytes_received = self.session.bytes_received,
            bytes_sent = self.session.bytes_sent,
            duration_secs = self.session.duration().as_secs(),
            "Connection closed"
        );

        result
    }

    async fn handle(&mut self) -> Result<()> {
        let raw = self.transport.stream_id().await?;
        let identity = self.parser.parse(&raw)?;
        self.session.on_identity(identity.clone());

        let identity = match authorize(self.auth.as_ref(), identity, self.config.auth_timeout()).await {
            Ok(identity) => identity,
            Err(e) => {
                tracing::warn!(
                    session_id = self.session.id,
                    peer = %self.session.peer_addr,
                    error = %e,
                    "Access denied"
                );
                return Err(e);
            }
        };
        self.session.on_authenticated(identity.clone());

        match identity.intent() {
            Intent::Publish => self.publish(&identity).await,
            Intent::Play => self.play(&identity).await,
        }
    }

    async fn publish(&mut self, identity: &StreamIdentity) -> Result<()> {
        let publisher = self.relay.publish(identity.name())?;
        self.session.start_publish();

        tracing::info!(
            session_id = self.session.id,
            peer = %self.session.peer_addr,
            stream = %identity.name(),
            "Publishing"
        );

        let packet_size = self.relay.config().packet_size.max(1);
        loop {
            let mut buf = BytesMut::zeroed(packet_size);
            let n = self.fill(&mut buf).await?;
            if n == 0 {
                return Ok(());
            }

            buf.truncate(n);
            self.session.bytes_received += n as u64;
            publisher.send(buf.freeze());

            // Short fill means the peer finished
            if n < packet_size {
                return Ok(());
            }
        }
    }

    /// Read until `buf` is full or the peer closes, returning bytes read
    async fn fill(&mut self, buf: &mut [u8]) -> Result<usize> {
        let mut filled = 0;
        while filled < buf.len() {
            let n = self.transport.read(&mut buf[filled..]).await?;
            if n == 0 {
                break;
            }
            filled += n;
        }
        Ok(filled)
    }

    async fn play(&mut self, identity: &StreamIdentity) -> Result<()> {
        let mut subscription = self.relay.subscribe(identity.name())?;
        self.session.start_play();

        tracing::info!(
            session_id = self.session.id,
            peer = %self.session.peer_addr,
            stream = %identity.name(),
            sync = self.config.sync_clients,
            "Playing"
        );

        let mut sync = self.config.sync_clients.then(SyncFinder::new);
        let mut last_late_warning: Option<Instant> = None;

        while let Some(buf) = subscription.recv().await {
            self.check_late(&subscription, &mut last_late_warning);

            if let Some(finder) = sync.as_mut() {
                let Some(lead_in) = finder.consider(&buf) else {
                    continue;
                };
                tracing::debug!(
                    session_id = self.session.id,
                    stream = %identity.name(),
                    lead_in_buffers = lead_in.len(),
                    malformed = finder.malformed_count(),
                    "Viewer synchronized"
                );
                sync = None;

                for chunk in lead_in {
                    self.write(&chunk).await?;
                }
                continue;
            }

            self.write(&buf).await?;
        }

        tracing::info!(
            session_id = self.session.id,
            stream = %identity.name(),
            dropped = subscription.dropped(),
            "Stream ended"
        );
        Ok(())
    }

    fn check_late(&self, subscription: &Subscription, last_warning: &mut Option<Instant>) {
        let queued = subscription.queued();
        if queued <= self.config.late_packet_threshold {
            return;
        }

        let due = last_warning.map_or(true, |at| at.elapsed() >= LATE_WARNING_INTERVAL);
        if due {
            *last_warning = Some(Instant::now());
            tracing::warn!(
                session_id = self.session.id,
                peer = %self.session.peer_addr,
                stream = %subscription.name(),
                queued = queued,
                "Viewer is late, packets waiting in buffer"
            );
        }
    }

    async fn write(&mut self, buf: &Bytes) -> Result<()> {
        self.transport.write_all(buf).await?;
        self.session.bytes_sent += buf.len() as u64;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::io;
    use std::net::SocketAddr;
    use std::pin::Pin;
    use std::task::{Context, Poll};

    use async_trait::async_trait;
    use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
    use tokio_test::io::{Builder, Mock};

    use super::*;
    use crate::auth::{AllowAll, StaticAuth};
    use crate::error::Error;
    use crate::registry::{RegistryError, RelayConfig};
    use crate::session::ConnectionPhase;

    /// Scripted transport around a `tokio_test` mock
    struct MockTransport {
        id: &'static str,
        io: Mock,
    }

    #[async_trait]
    impl Transport for MockTransport {
        async fn stream_id(&mut self) -> io::Result<String> {
            Ok(self.id.to_string())
        }

        fn peer_addr(&self) -> SocketAddr {
            "127.0.0.1:50000".parse().unwrap()
        }
    }

    impl AsyncRead for MockTransport {
        fn poll_read(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &mut ReadBuf<'_>,
        ) -> Poll<io::Result<()>> {
            Pin::new(&mut self.io).poll_read(cx, buf)
        }
    }

    impl AsyncWrite for MockTransport {
        fn poll_write(
            mut self: Pin<&mut Self>,
            cx: &mut Context<'_>,
            buf: &[u8],
        ) -> Poll<io::Result<usize>> {
            Pin::new(&mut self.io).poll_write(cx, buf)
        }

        fn poll_flush(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.io).poll_flush(cx)
        }

        fn poll_shutdown(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
            Pin::new(&mut self.io).poll_shutdown(cx)
        }
    }

    fn relay(packet_size: usize) -> Arc<Relay> {
        Arc::new(Relay::with_config(
            RelayConfig::default().packet_size(packet_size),
        ))
    }

    fn connection(
        id: &'static str,
        io: Mock,
        relay: &Arc<Relay>,
        auth: Arc<dyn Authenticator>,
    ) -> Connection<MockTransport> {
        Connection::new(
            1,
            MockTransport { id, io },
            Arc::new(ServerConfig::default()),
            Arc::clone(relay),
            auth,
        )
    }

    #[tokio::test]
    async fn test_publish_frames_reads_into_packets() {
        let relay = relay(4);
        let io = Builder::new()
            .wait(Duration::from_millis(50))
            .read(b"ab")
            .read(b"cdef")
            .read(b"gh")
            .read(b"i")
            .build();
        let mut conn = connection("publish/foo", io, &relay, Arc::new(AllowAll));
        let publishing = tokio::spawn(async move {
            conn.run().await.map(|_| conn.session().bytes_received)
        });

        while !relay.has_active_stream("foo") {
            tokio::task::yield_now().await;
        }
        let mut sub = relay.subscribe("foo").unwrap();

        assert_eq!(publishing.await.unwrap().unwrap(), 9);
        assert_eq!(sub.recv().await.unwrap(), Bytes::from_static(b"abcd"));
        assert_eq!(sub.recv().await.unwrap(), Bytes::from_static(b"efgh"));
        assert_eq!(sub.recv().await.unwrap(), Bytes::from_static(b"i"));
        assert_eq!(sub.recv().await, None);
        assert_eq!(relay.stream_count(), 0);
    }

    #[tokio::test]
    async fn test_publish_clean_end_releases_stream() {
        let relay = relay(4);
        let io = Builder::new().read(b"abcdefgh").build();
        let mut conn = connection("publish/foo", io, &relay, Arc::new(AllowAll));

        conn.run().await.unwrap();
        assert_eq!(conn.session().phase, ConnectionPhase::Closed);
        assert_eq!(conn.session().bytes_received, 8);
        assert!(!relay.has_active_stream("foo"));
        assert!(relay.publish("foo").is_ok());
    }

    #[tokio::test]
    async fn test_publish_busy_stream() {
        let relay = relay(4);
        let _existing = relay.publish("foo").unwrap();

        let io = Builder::new().build();
        let mut conn = connection("publish/foo", io, &relay, Arc::new(AllowAll));

        let err = conn.run().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Registry(RegistryError::StreamBusy(ref name)) if name == "foo"
        ));
        assert!(relay.has_active_stream("foo"));
    }

    #[tokio::test]
    async fn test_play_writes_buffers_until_end() {
        let relay = relay(4);
        let publisher = relay.publish("foo").unwrap();

        let io = Builder::new().write(b"1234").write(b"5678").build();
        let mut conn = connection("play/foo", io, &relay, Arc::new(AllowAll));

        let player = tokio::spawn(async move {
            conn.run().await.map(|_| conn.session().bytes_sent)
        });

        while relay.statistics().first().map_or(0, |s| s.subscribers) == 0 {
            tokio::task::yield_now().await;
        }
        publisher.send(Bytes::from_static(b"1234"));
        publisher.send(Bytes::from_static(b"5678"));
        drop(publisher);

        assert_eq!(player.await.unwrap().unwrap(), 8);
        assert_eq!(relay.stream_count(), 0);
    }

    #[tokio::test]
    async fn test_play_without_publisher() {
        let relay = relay(4);
        let io = Builder::new().build();
        let mut conn = connection("play/foo", io, &relay, Arc::new(AllowAll));

        let err = conn.run().await.unwrap_err();
        assert!(matches!(
            err,
            Error::Registry(RegistryError::StreamNotFound(_))
        ));
        assert_eq!(relay.stream_count(), 0);
    }

    #[tokio::test]
    async fn test_malformed_identity_closes() {
        let relay = relay(4);
        let io = Builder::new().build();
        let mut conn = connection("watch/foo", io, &relay, Arc::new(AllowAll));

        assert!(matches!(conn.run().await, Err(Error::Identity(_))));
        assert_eq!(conn.session().phase, ConnectionPhase::Closed);
    }

    #[tokio::test]
    async fn test_denied_identity_never_registers() {
        let relay = relay(4);
        let io = Builder::new().build();
        let auth = Arc::new(StaticAuth::new(["play/*"]));
        let mut conn = connection("publish/foo/pw", io, &relay, auth);

        assert!(matches!(conn.run().await, Err(Error::AuthDenied { .. })));
        assert_eq!(relay.stream_count(), 0);
    }
}
