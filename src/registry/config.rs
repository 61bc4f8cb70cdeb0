//! Registry configuration

use std::time::Duration;

use serde::Deserialize;

/// Default relay packet size: seven 188-byte transport stream packets
pub const DEFAULT_PACKET_SIZE: usize = 1316;

/// Stream registry configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    /// Per-subscriber queue size in bytes
    pub buffer_size: usize,

    /// Size of one relayed buffer in bytes
    pub packet_size: usize,

    /// Minimum time between drop warnings for one subscriber, in milliseconds
    pub drop_warning_interval_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            buffer_size: 384_000,
            packet_size: DEFAULT_PACKET_SIZE,
            drop_warning_interval_ms: 1000,
        }
    }
}

impl RelayConfig {
    /// Per-subscriber queue capacity in buffers
    pub fn queue_capacity(&self) -> usize {
        (self.buffer_size / self.packet_size.max(1)).max(1)
    }

    pub fn drop_warning_interval(&self) -> Duration {
        Duration::from_millis(self.drop_warning_interval_ms)
    }

    /// Set the per-subscriber queue size in bytes
    pub fn buffer_size(mut self, bytes: usize) -> Self {
        self.buffer_size = bytes;
        self
    }

    /// Set the queue capacity directly in buffers
    pub fn queue_capacity_packets(mut self, packets: usize) -> Self {
        self.buffer_size = packets * self.packet_size.max(1);
        self
    }

    pub fn packet_size(mut self, bytes: usize) -> Self {
        self.packet_size = bytes;
        self
    }

    pub fn drop_warning_interval_ms(mut self, ms: u64) -> Self {
        self.drop_warning_interval_ms = ms;
        self
    }
}
