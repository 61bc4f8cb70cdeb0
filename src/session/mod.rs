//! Per-connection session types
//!
//! - `identity`: the stream identity a connection announces
//! - `state`: the connection lifecycle state machine

pub mod identity;
pub mod state;

pub use identity::{IdentityParser, Intent, ParseError, StreamIdentity};
pub use state::{ConnectionPhase, SessionState};
