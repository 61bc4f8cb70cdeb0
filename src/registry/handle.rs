//! Publisher and subscriber handles
//!
//! Handles are the only way to feed or drain a stream. Dropping one releases
//! its registration, so teardown runs on every exit path of a connection.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;

use super::entry::StreamEntry;
use super::store::Relay;

/// Exclusive right to feed one stream
///
/// Dropping the publisher ends the stream: every subscriber queue is closed.
pub struct Publisher {
    relay: Arc<Relay>,
    entry: Arc<StreamEntry>,
    id: u64,
}

impl Publisher {
    pub(super) fn new(relay: Arc<Relay>, entry: Arc<StreamEntry>, id: u64) -> Self {
        Self { relay, entry, id }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        self.entry.name()
    }

    /// Push one buffer to all subscribers
    ///
    /// Never waits on a subscriber. Returns how many subscribers accepted it.
    pub fn send(&self, buf: Bytes) -> usize {
        self.entry
            .fan_out(buf, self.relay.config().drop_warning_interval())
    }
}

impl Drop for Publisher {
    fn drop(&mut self) {
        self.relay.release_publisher(&self.entry, self.id);
    }
}

impl std::fmt::Debug for Publisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Publisher")
            .field("id", &self.id)
            .field("stream", &self.entry.name())
            .finish()
    }
}

/// Receiving end of one subscriber's queue
///
/// Dropping the subscription unregisters it from the stream.
pub struct Subscription {
    relay: Arc<Relay>,
    entry: Arc<StreamEntry>,
    id: u64,
    rx: mpsc::Receiver<Bytes>,
    dropped: Arc<AtomicU64>,
}

impl Subscription {
    pub(super) fn new(
        relay: Arc<Relay>,
        entry: Arc<StreamEntry>,
        id: u64,
        rx: mpsc::Receiver<Bytes>,
        dropped: Arc<AtomicU64>,
    ) -> Self {
        Self {
            relay,
            entry,
            id,
            rx,
            dropped,
        }
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> &str {
        self.entry.name()
    }

    /// Next buffer, or `None` once the publisher is gone and the queue drained
    pub async fn recv(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Result<Bytes, mpsc::error::TryRecvError> {
        self.rx.try_recv()
    }

    /// Buffers waiting in the queue
    pub fn queued(&self) -> usize {
        self.rx.len()
    }

    /// Buffers dropped because the queue was full
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.relay.unsubscribe(&self.entry, self.id);
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("stream", &self.entry.name())
            .field("dropped", &self.dropped())
            .finish()
    }
}
