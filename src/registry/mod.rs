//! Stream registry for pub/sub routing
//!
//! The registry manages active streams and fans each publisher's buffers
//! out to that stream's subscribers.
//!
//! # Architecture
//!
//! ```text
//!                              Arc<Relay>
//!                     ┌──────────────────────────┐
//!                     │ streams: HashMap<Name,   │
//!                     │   Arc<StreamEntry {      │
//!                     │     publisher_id,        │
//!                     │     subscribers: [tx..], │
//!                     │   }>                     │
//!                     │ >                        │
//!                     └────────────┬─────────────┘
//!                                  │
//!         ┌────────────────────────┼────────────────────────┐
//!         │                        │                        │
//!         ▼                        ▼                        ▼
//!    [Publisher]             [Subscription]           [Subscription]
//!    send(buf)               recv().await             recv().await
//!         │                        ▲                        ▲
//!         └──► try_send per queue ─┴────────────────────────┘
//! ```
//!
//! # Backpressure
//!
//! Each subscriber owns a bounded queue. Fan-out never waits: when a queue
//! is full the buffer is dropped for that subscriber alone and its drop
//! counter increments. A slow viewer cannot stall the publisher or any
//! other viewer.
//!
//! # Zero-Copy Design
//!
//! `bytes::Bytes` uses reference counting, so all subscribers share the same
//! memory allocation for a given buffer.

pub mod config;
pub mod entry;
pub mod error;
pub mod handle;
pub mod store;

pub use config::RelayConfig;
pub use entry::StreamEntry;
pub use error::RegistryError;
pub use handle::{Publisher, Subscription};
pub use store::Relay;
