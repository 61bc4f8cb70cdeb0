//! Relay server
//!
//! - `transport`: the `Acceptor` / `Transport` boundary the core depends on
//! - `tcp`: TCP adapter announcing the stream identity as a first line
//! - `connection`: per-connection orchestration (identity, auth, publish/play)
//! - `listener`: accept loops, connection accounting and statistics

pub mod config;
pub mod connection;
pub mod listener;
pub mod tcp;
pub mod transport;

pub use config::ServerConfig;
pub use connection::Connection;
pub use listener::RelayServer;
pub use tcp::{TcpAcceptor, TcpConnection};
pub use transport::{Acceptor, Transport};
