//! Statistics for relayed streams and the server

use serde::Serialize;

/// Stream-level statistics
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StreamStatistics {
    /// Stream name
    pub name: String,
    /// Playback URL, filled in by the server
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Current subscriber count
    pub subscribers: usize,
    /// Payload bytes pushed by the publisher
    pub bytes_relayed: u64,
    /// Buffers pushed by the publisher
    pub packets_relayed: u64,
    /// Buffers dropped across current subscribers
    pub dropped_packets: u64,
    /// Seconds since the stream was created
    pub uptime_secs: u64,
}

impl StreamStatistics {
    /// Average buffer size in bytes
    pub fn average_packet_size(&self) -> u64 {
        if self.packets_relayed > 0 {
            self.bytes_relayed / self.packets_relayed
        } else {
            0
        }
    }

    /// Average bitrate since creation (bits/sec)
    pub fn bitrate(&self) -> u64 {
        if self.uptime_secs > 0 {
            (self.bytes_relayed * 8) / self.uptime_secs
        } else {
            0
        }
    }
}

/// Server-wide statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ServerStats {
    /// Total connections ever accepted
    pub total_connections: u64,
    /// Connections currently being handled
    pub active_connections: u64,
    /// Streams currently registered
    pub active_streams: u64,
    /// Seconds since the server started
    pub uptime_secs: u64,
}
