//! Server configuration

use std::time::Duration;

use serde::Deserialize;

use crate::session::identity::DEFAULT_CREDENTIAL_KEY;

/// Server configuration options
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on; a host resolving to several addresses gets one
    /// listener per address
    pub address: String,

    /// Address advertised in playback URLs (falls back to `address`)
    pub public_address: String,

    /// Hold new viewers back until a sync point
    pub sync_clients: bool,

    /// Maximum concurrent connections (0 = unlimited)
    pub max_connections: usize,

    /// Time allowed for a peer to announce its stream identity
    pub handshake_timeout_ms: u64,

    /// Time allowed for the authenticator to decide
    pub auth_timeout_ms: u64,

    /// Close a connection whose pending read sees no data for this long
    /// (0 = never)
    pub idle_timeout_ms: u64,

    /// Queue depth past which a viewer is reported as late
    pub late_packet_threshold: usize,

    /// Key of the credential field in `#!::` stream identities
    pub credential_key: String,

    /// Enable TCP_NODELAY (disable Nagle's algorithm)
    pub tcp_nodelay: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "localhost:1337".to_string(),
            public_address: String::new(),
            sync_clients: false,
            max_connections: 0, // Unlimited
            handshake_timeout_ms: 5000,
            auth_timeout_ms: 2000,
            idle_timeout_ms: 5000,
            late_packet_threshold: 144,
            credential_key: DEFAULT_CREDENTIAL_KEY.to_string(),
            tcp_nodelay: true, // Important for low latency
        }
    }
}

impl ServerConfig {
    /// Create a new config with custom listen address
    pub fn with_address(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            ..Default::default()
        }
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn auth_timeout(&self) -> Duration {
        Duration::from_millis(self.auth_timeout_ms)
    }

    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.idle_timeout_ms > 0).then(|| Duration::from_millis(self.idle_timeout_ms))
    }

    /// Address used when composing playback URLs
    pub fn advertised_address(&self) -> &str {
        if self.public_address.is_empty() {
            &self.address
        } else {
            &self.public_address
        }
    }

    /// Set the listen address
    pub fn address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Set the address advertised in playback URLs
    pub fn public_address(mut self, address: impl Into<String>) -> Self {
        self.public_address = address.into();
        self
    }

    /// Enable or disable newcomer synchronization
    pub fn sync_clients(mut self, enabled: bool) -> Self {
        self.sync_clients = enabled;
        self
    }

    /// Set maximum connections
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Set handshake timeout
    pub fn handshake_timeout_ms(mut self, ms: u64) -> Self {
        self.handshake_timeout_ms = ms;
        self
    }

    /// Set authentication timeout
    pub fn auth_timeout_ms(mut self, ms: u64) -> Self {
        self.auth_timeout_ms = ms;
        self
    }

    /// Set read idle timeout
    pub fn idle_timeout_ms(mut self, ms: u64) -> Self {
        self.idle_timeout_ms = ms;
        self
    }

    pub fn late_packet_threshold(mut self, packets: usize) -> Self {
        self.late_packet_threshold = packets;
        self
    }

    pub fn credential_key(mut self, key: impl Into<String>) -> Self {
        self.credential_key = key.into();
        self
    }
}
