//! Stream entry and subscriber slots
//!
//! This module defines the per-stream state stored in the registry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use parking_lot::Mutex;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::stats::StreamStatistics;

/// Registry-side end of one subscriber's queue
pub(super) struct SubscriberSlot {
    pub(super) id: u64,
    tx: mpsc::Sender<Bytes>,
    dropped: Arc<AtomicU64>,
    joined_at: Instant,
    last_drop_warning: Option<Instant>,
}

impl SubscriberSlot {
    pub(super) fn new(id: u64, tx: mpsc::Sender<Bytes>, dropped: Arc<AtomicU64>) -> Self {
        Self {
            id,
            tx,
            dropped,
            joined_at: Instant::now(),
            last_drop_warning: None,
        }
    }

    fn on_full(&mut self, stream: &str, warning_interval: Duration) {
        let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;

        let due = self
            .last_drop_warning
            .map_or(true, |at| at.elapsed() >= warning_interval);
        if due {
            self.last_drop_warning = Some(Instant::now());
            tracing::warn!(
                stream = %stream,
                subscriber = self.id,
                dropped = dropped,
                connected_secs = self.joined_at.elapsed().as_secs(),
                "Subscriber queue full, dropping packet"
            );
        }
    }
}

/// Mutable part of a stream entry, guarded by the entry lock
pub(super) struct EntryState {
    /// Current publisher's handle ID (None if no publisher)
    pub(super) publisher_id: Option<u64>,

    /// Subscribers in join order
    pub(super) subscribers: Vec<SubscriberSlot>,
}

impl EntryState {
    /// No publisher and no subscribers left
    pub(super) fn is_idle(&self) -> bool {
        self.publisher_id.is_none() && self.subscribers.is_empty()
    }
}

/// Entry for a single stream in the registry
pub struct StreamEntry {
    name: String,

    /// When the stream was created
    created_at: Instant,

    /// Payload bytes pushed by publishers
    bytes_relayed: AtomicU64,

    /// Buffers pushed by publishers
    packets_relayed: AtomicU64,

    pub(super) state: Mutex<EntryState>,
}

impl StreamEntry {
    pub(super) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            created_at: Instant::now(),
            bytes_relayed: AtomicU64::new(0),
            packets_relayed: AtomicU64::new(0),
            state: Mutex::new(EntryState {
                publisher_id: None,
                subscribers: Vec::new(),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Get the number of subscribers
    pub fn subscriber_count(&self) -> usize {
        self.state.lock().subscribers.len()
    }

    /// Check if the stream has an active publisher
    pub fn has_publisher(&self) -> bool {
        self.state.lock().publisher_id.is_some()
    }

    /// Deliver `buf` to every subscriber without waiting
    ///
    /// A full queue drops `buf` for that subscriber only. Subscribers whose
    /// receiving end is gone are pruned. Returns the number of queues that
    /// accepted the buffer.
    pub(super) fn fan_out(&self, buf: Bytes, warning_interval: Duration) -> usize {
        let mut state = self.state.lock();

        self.packets_relayed.fetch_add(1, Ordering::Relaxed);
        self.bytes_relayed
            .fetch_add(buf.len() as u64, Ordering::Relaxed);

        let mut delivered = 0;
        state.subscribers.retain_mut(|slot| match slot.tx.try_send(buf.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(TrySendError::Full(_)) => {
                slot.on_full(&self.name, warning_interval);
                true
            }
            Err(TrySendError::Closed(_)) => {
                tracing::debug!(
                    stream = %self.name,
                    subscriber = slot.id,
                    "Pruning subscriber with closed queue"
                );
                false
            }
        });

        delivered
    }

    /// Point-in-time snapshot, consistent for this entry
    pub fn statistics(&self) -> StreamStatistics {
        let state = self.state.lock();

        StreamStatistics {
            name: self.name.clone(),
            url: None,
            subscribers: state.subscribers.len(),
            bytes_relayed: self.bytes_relayed.load(Ordering::Relaxed),
            packets_relayed: self.packets_relayed.load(Ordering::Relaxed),
            dropped_packets: state
                .subscribers
                .iter()
                .map(|s| s.dropped.load(Ordering::Relaxed))
                .sum(),
            uptime_secs: self.created_at.elapsed().as_secs(),
        }
    }
}

impl std::fmt::Debug for StreamEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StreamEntry")
            .field("name", &self.name)
            .field("packets_relayed", &self.packets_relayed.load(Ordering::Relaxed))
            .finish_non_exhaustive()
    }
}
