//! Statistics reported by the relay

pub mod metrics;

pub use metrics::{ServerStats, StreamStatistics};
