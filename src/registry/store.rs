//! Stream registry implementation
//!
//! The central registry that manages all active streams and routes
//! buffers from publishers to subscribers.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tokio::sync::mpsc;

use super::config::RelayConfig;
use super::entry::{StreamEntry, SubscriberSlot};
use super::error::RegistryError;
use super::handle::{Publisher, Subscription};
use crate::stats::StreamStatistics;

/// Central registry for all active streams
///
/// The map lock is only taken for writing when an entry is inserted or
/// removed. Fan-out touches nothing but the entry's own lock, so unrelated
/// streams never contend.
pub struct Relay {
    /// Map of stream name to stream entry
    streams: RwLock<HashMap<String, Arc<StreamEntry>>>,

    /// Configuration
    config: RelayConfig,

    /// Source of publisher and subscriber handle IDs
    next_handle_id: AtomicU64,
}

impl Relay {
    /// Create a new relay with default configuration
    pub fn new() -> Self {
        Self::with_config(RelayConfig::default())
    }

    /// Create a new relay with custom configuration
    pub fn with_config(config: RelayConfig) -> Self {
        Self {
            streams: RwLock::new(HashMap::new()),
            config,
            next_handle_id: AtomicU64::new(1),
        }
    }

    /// Get the relay configuration
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    fn next_id(&self) -> u64 {
        self.next_handle_id.fetch_add(1, Ordering::Relaxed)
    }

    /// Claim the publisher slot of a stream
    ///
    /// Creates the stream if needed. Fails with `StreamBusy` while another
    /// publisher holds the slot; that publisher is not affected.
    pub fn publish(self: &Arc<Self>, name: &str) -> Result<Publisher, RegistryError> {
        let id = self.next_id();
        let mut streams = self.streams.write();

        let entry = Arc::clone(
            streams
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(StreamEntry::new(name))),
        );

        let mut state = entry.state.lock();
        if state.publisher_id.is_some() {
            return Err(RegistryError::StreamBusy(name.to_string()));
        }
        state.publisher_id = Some(id);

        tracing::info!(
            stream = %name,
            publisher = id,
            subscribers = state.subscribers.len(),
            "Publisher registered"
        );

        drop(state);
        Ok(Publisher::new(Arc::clone(self), entry, id))
    }

    /// Join a stream that currently has a publisher
    pub fn subscribe(self: &Arc<Self>, name: &str) -> Result<Subscription, RegistryError> {
        let streams = self.streams.read();

        let entry = streams
            .get(name)
            .ok_or_else(|| RegistryError::StreamNotFound(name.to_string()))?;

        let mut state = entry.state.lock();
        if state.publisher_id.is_none() {
            return Err(RegistryError::StreamNotFound(name.to_string()));
        }

        let id = self.next_id();
        let (tx, rx) = mpsc::channel(self.config.queue_capacity());
        let dropped = Arc::new(AtomicU64::new(0));
        state
            .subscribers
            .push(SubscriberSlot::new(id, tx, Arc::clone(&dropped)));

        tracing::info!(
            stream = %name,
            subscriber = id,
            subscribers = state.subscribers.len(),
            "Subscriber added"
        );

        drop(state);
        Ok(Subscription::new(
            Arc::clone(self),
            Arc::clone(entry),
            id,
            rx,
            dropped,
        ))
    }

    /// Release a publisher slot, closing every subscriber queue
    pub(super) fn release_publisher(&self, entry: &Arc<StreamEntry>, id: u64) {
        let mut state = entry.state.lock();

        if state.publisher_id != Some(id) {
            tracing::warn!(
                stream = %entry.name(),
                expected = ?state.publisher_id,
                actual = id,
                "Publisher release mismatch"
            );
            return;
        }

        state.publisher_id = None;
        let closed = state.subscribers.len();
        // Dropping the senders ends each subscriber's queue once drained
        state.subscribers.clear();
        drop(state);

        self.remove_if_idle(entry);

        tracing::info!(
            stream = %entry.name(),
            publisher = id,
            subscribers_closed = closed,
            "Publisher released, stream ended"
        );
    }

    /// Remove a subscriber, dropping the entry once nothing references it
    pub(super) fn unsubscribe(&self, entry: &Arc<StreamEntry>, id: u64) {
        let mut state = entry.state.lock();

        let before = state.subscribers.len();
        state.subscribers.retain(|s| s.id != id);
        let removed = before != state.subscribers.len();
        let idle = state.is_idle();
        let remaining = state.subscribers.len();
        drop(state);

        if idle {
            self.remove_if_idle(entry);
        }

        if removed {
            tracing::debug!(
                stream = %entry.name(),
                subscriber = id,
                subscribers = remaining,
                "Subscriber removed"
            );
        }
    }

    /// Remove `entry` from the map if it is still unused and no newer entry
    /// took its name
    ///
    /// Idleness is checked again under the map write lock, since a publisher
    /// may have claimed the entry after the caller released it.
    fn remove_if_idle(&self, entry: &Arc<StreamEntry>) {
        let mut streams = self.streams.write();
        let current = streams
            .get(entry.name())
            .is_some_and(|current| Arc::ptr_eq(current, entry));

        if current && entry.state.lock().is_idle() {
            streams.remove(entry.name());
        }
    }

    /// Snapshot of every stream, ordered by name
    pub fn statistics(&self) -> Vec<StreamStatistics> {
        let entries: Vec<Arc<StreamEntry>> = self.streams.read().values().cloned().collect();

        let mut stats: Vec<StreamStatistics> =
            entries.iter().map(|entry| entry.statistics()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Check if a stream exists and has an active publisher
    pub fn has_active_stream(&self, name: &str) -> bool {
        self.streams
            .read()
            .get(name)
            .is_some_and(|entry| entry.has_publisher())
    }

    /// Get total number of streams
    pub fn stream_count(&self) -> usize {
        self.streams.read().len()
    }
}

impl Default for Relay {
    fn default() -> Self {
        Self::new()
    }
}
