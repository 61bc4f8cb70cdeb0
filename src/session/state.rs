//! Connection state machine
//!
//! Tracks a relay connection from accept to close:
//!
//! ```text
//! Accepted -> IdentityParsed -> Authenticated -> Publishing | Playing -> Closed
//! ```
//!
//! Any failure jumps straight to `Closed`.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use super::identity::StreamIdentity;

/// Connection lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionPhase {
    /// Transport accepted, identity not yet read
    Accepted,
    /// Identity string parsed
    IdentityParsed,
    /// Access granted by the authenticator
    Authenticated,
    /// Feeding a stream
    Publishing,
    /// Receiving a stream
    Playing,
    /// Connection finished
    Closed,
}

/// Per-connection state
#[derive(Debug)]
pub struct SessionState {
    /// Unique session ID
    pub id: u64,

    /// Remote peer address
    pub peer_addr: SocketAddr,

    /// Current phase
    pub phase: ConnectionPhase,

    /// Accept time
    pub connected_at: Instant,

    /// Effective identity (after authentication rewrite)
    pub identity: Option<StreamIdentity>,

    /// Bytes read from the peer
    pub bytes_received: u64,

    /// Bytes written to the peer
    pub bytes_sent: u64,
}

impl SessionState {
    pub fn new(id: u64, peer_addr: SocketAddr) -> Self {
        Self {
            id,
            peer_addr,
            phase: ConnectionPhase::Accepted,
            connected_at: Instant::now(),
            identity: None,
            bytes_received: 0,
            bytes_sent: 0,
        }
    }

    pub fn on_identity(&mut self, identity: StreamIdentity) {
        if self.phase == ConnectionPhase::Accepted {
            self.identity = Some(identity);
            self.phase = ConnectionPhase::IdentityParsed;
        }
    }

    /// Record the effective identity granted by the authenticator
    pub fn on_authenticated(&mut self, identity: StreamIdentity) {
        if self.phase == ConnectionPhase::IdentityParsed {
            self.identity = Some(identity);
            self.phase = ConnectionPhase::Authenticated;
        }
    }

    pub fn start_publish(&mut self) {
        if self.phase == ConnectionPhase::Authenticated {
            self.phase = ConnectionPhase::Publishing;
        }
    }

    pub fn start_play(&mut self) {
        if self.phase == ConnectionPhase::Authenticated {
            self.phase = ConnectionPhase::Playing;
        }
    }

    /// Terminal transition, reachable from every phase
    pub fn close(&mut self) {
        self.phase = ConnectionPhase::Closed;
    }

    pub fn is_closed(&self) -> bool {
        self.phase == ConnectionPhase::Closed
    }

    pub fn duration(&self) -> Duration {
        self.connected_at.elapsed()
    }

    /// Stream name of the effective identity, if known
    pub fn stream_name(&self) -> Option<&str> {
        self.identity.as_ref().map(|id| id.name())
    }
}
