//! Error types for ts-relay

use crate::config::ConfigError;
use crate::registry::RegistryError;
use crate::session::ParseError;

/// Main error type
///
/// Every variant is local to the connection that raised it; none of them
/// stop the server.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Stream identity could not be parsed
    #[error("invalid stream identity: {0}")]
    Identity(#[from] ParseError),

    /// Authenticator refused the connection, timed out or failed
    #[error("access denied for {stream}: {reason}")]
    AuthDenied {
        /// Formatted identity, never includes the credential
        stream: String,
        reason: String,
    },

    /// Publish or subscribe refused by the registry
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Transport read or write failure
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration could not be loaded
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, Error>;
