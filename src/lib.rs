//! # ts-relay
//!
//! A low-latency relay for live MPEG-TS streams.
//!
//! One publisher feeds a named stream; any number of viewers receive it.
//! Each viewer has a bounded queue and a viewer that falls behind loses
//! packets instead of slowing anyone else down. Viewers joining mid-stream
//! can be held back until the next keyframe so playback starts cleanly.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use ts_relay::auth::AllowAll;
//! use ts_relay::{RelayConfig, RelayServer, ServerConfig};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn run() -> ts_relay::Result<()> {
//! let server = RelayServer::new(
//!     ServerConfig::with_address("0.0.0.0:1337").sync_clients(true),
//!     RelayConfig::default(),
//!     Arc::new(AllowAll),
//! );
//! let cancel = CancellationToken::new();
//! server.listen(cancel.clone()).await?;
//! # Ok(())
//! # }
//! ```

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod media;
pub mod registry;
pub mod server;
pub mod session;
pub mod stats;

pub use config::Config;
pub use error::{Error, Result};
pub use registry::{Publisher, Relay, RelayConfig, Subscription};
pub use server::{RelayServer, ServerConfig};
pub use session::{Intent, StreamIdentity};
