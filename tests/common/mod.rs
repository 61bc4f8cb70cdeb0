//! Shared helpers for integration tests

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;

use ts_relay::auth::Authenticator;
use ts_relay::{Relay, RelayConfig, RelayServer, ServerConfig};

pub const TS_PACKET_SIZE: usize = 188;
pub const PACKETS_PER_BUFFER: usize = 7;
pub const BUFFER_SIZE: usize = TS_PACKET_SIZE * PACKETS_PER_BUFFER;

pub const PMT_PID: u16 = 0x1000;
pub const VIDEO_PID: u16 = 0x0100;

pub struct TestServer {
    pub server: RelayServer,
    pub addr: SocketAddr,
    cancel: CancellationToken,
}

impl TestServer {
    pub async fn start(config: ServerConfig, auth: Arc<dyn Authenticator>) -> Self {
        let relay = Arc::new(Relay::with_config(RelayConfig::default()));
        let server = RelayServer::with_relay(config.address("127.0.0.1:0"), relay, auth);
        let cancel = CancellationToken::new();
        let addrs = server.listen(cancel.clone()).await.unwrap();

        Self {
            server,
            addr: addrs[0],
            cancel,
        }
    }

    pub fn relay(&self) -> &Arc<Relay> {
        self.server.relay()
    }

    /// Open a connection and announce `stream_id`
    pub async fn connect(&self, stream_id: &str) -> TcpStream {
        let mut stream = TcpStream::connect(self.addr).await.unwrap();
        stream
            .write_all(format!("{}\n", stream_id).as_bytes())
            .await
            .unwrap();
        stream
    }

    /// Wait until `check` holds, polling the registry
    pub async fn wait_for(&self, mut check: impl FnMut(&Relay) -> bool) {
        tokio::time::timeout(Duration::from_secs(5), async {
            while !check(self.relay()) {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("condition not reached in time");
    }

    pub async fn wait_for_subscribers(&self, name: &str, count: usize) {
        self.wait_for(|relay| {
            relay
                .statistics()
                .iter()
                .any(|s| s.name == name && s.subscribers == count)
        })
        .await;
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Read everything until the relay closes the connection
pub async fn read_until_closed(stream: &mut TcpStream) -> Vec<u8> {
    let mut out = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut out))
        .await
        .expect("connection not closed in time")
        .unwrap();
    out
}

/// Whether the relay closed the connection within `wait`
pub async fn closed_within(stream: &mut TcpStream, wait: Duration) -> bool {
    let mut byte = [0u8; 1];
    matches!(
        tokio::time::timeout(wait, stream.read(&mut byte)).await,
        Ok(Ok(0)) | Ok(Err(_))
    )
}

fn packet(pid: u16, pusi: bool, payload: &[u8]) -> Vec<u8> {
    let mut packet = vec![0x47, ((pusi as u8) << 6) | ((pid >> 8) as u8 & 0x1F), pid as u8, 0x10];
    packet.extend_from_slice(payload);
    packet.resize(TS_PACKET_SIZE, 0xFF);
    packet
}

fn psi(table_id: u8, body: &[u8]) -> Vec<u8> {
    let section_length = 5 + body.len() + 4;
    let mut out = vec![0x00, table_id, 0xB0 | (section_length >> 8) as u8, section_length as u8];
    out.extend_from_slice(&[0x00, 0x01, 0xC1, 0x00, 0x00]);
    out.extend_from_slice(body);
    out.extend_from_slice(&[0xDE, 0xAD, 0xBE, 0xEF]);
    out
}

pub fn pat() -> Vec<u8> {
    let mut body = vec![0x00, 0x01];
    body.extend_from_slice(&(0xE000 | PMT_PID).to_be_bytes());
    packet(0x0000, true, &psi(0x00, &body))
}

/// PMT with a single H.264 stream
pub fn pmt() -> Vec<u8> {
    let mut body = (0xE000 | VIDEO_PID).to_be_bytes().to_vec();
    body.extend_from_slice(&[0xF0, 0x00, 0x1B]);
    body.extend_from_slice(&(0xE000 | VIDEO_PID).to_be_bytes());
    body.extend_from_slice(&[0xF0, 0x00]);
    packet(PMT_PID, true, &psi(0x02, &body))
}

fn pes(es: &[u8]) -> Vec<u8> {
    let mut payload = vec![0x00, 0x00, 0x01, 0xE0, 0x00, 0x00, 0x80, 0x00, 0x00];
    payload.extend_from_slice(es);
    packet(VIDEO_PID, true, &payload)
}

/// PES start carrying SPS + IDR slice
pub fn keyframe() -> Vec<u8> {
    pes(&[
        0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x1E, 0x00, 0x00, 0x01, 0x65, 0x88,
    ])
}

/// PES start carrying a non-IDR slice
pub fn interframe() -> Vec<u8> {
    pes(&[0x00, 0x00, 0x00, 0x01, 0x41, 0x9A])
}

/// Video continuation packet tagged with `tag`
pub fn continuation(tag: u8) -> Vec<u8> {
    packet(VIDEO_PID, false, &[tag; TS_PACKET_SIZE - 4])
}

/// A buffer of interframe data, distinguishable by `index`
pub fn plain_buffer(index: usize) -> Vec<u8> {
    let mut packets = vec![interframe()];
    packets.extend((1..PACKETS_PER_BUFFER).map(|_| continuation(index as u8)));
    packets.concat()
}

/// A buffer opening with PAT, PMT and a keyframe
pub fn sync_buffer(index: usize) -> Vec<u8> {
    let mut packets = vec![pat(), pmt(), keyframe()];
    packets.extend((3..PACKETS_PER_BUFFER).map(|_| continuation(index as u8)));
    packets.concat()
}
