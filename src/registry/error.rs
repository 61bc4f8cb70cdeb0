//! Registry error types
//!
//! Error types for stream registry operations.

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Stream already has an active publisher
    #[error("stream busy: {0}")]
    StreamBusy(String),
    /// No active publisher for the stream
    #[error("stream not found: {0}")]
    StreamNotFound(String),
}
