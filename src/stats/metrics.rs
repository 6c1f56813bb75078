//! Statistics for an engine session

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Point-in-time engine statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EngineStats {
    /// Items registered, including ones that only got a synthetic status
    pub items_opened: u64,
    /// Items removed from the registry
    pub items_removed: u64,
    /// Synthetic statuses delivered
    pub deferred_delivered: u64,
    /// Inbound messages routed to an item
    pub messages_routed: u64,
    /// Inbound messages dropped (unknown stream, mismatch, decode failure)
    pub messages_dropped: u64,
    /// Times the stream id space wrapped
    pub stream_id_wraps: u64,
    /// Items currently registered
    pub live_items: u64,
    /// Session uptime
    pub uptime: Duration,
}

impl EngineStats {
    /// Items registered but not yet removed, by the counters
    pub fn outstanding(&self) -> u64 {
        self.items_opened.saturating_sub(self.items_removed)
    }

    /// Share of inbound messages that were dropped
    pub fn drop_ratio(&self) -> f64 {
        let total = self.messages_routed + self.messages_dropped;
        if total == 0 {
            0.0
        } else {
            self.messages_dropped as f64 / total as f64
        }
    }
}

/// Live counters, updated without the engine lock
#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) items_opened: AtomicU64,
    pub(crate) items_removed: AtomicU64,
    pub(crate) deferred_delivered: AtomicU64,
    pub(crate) messages_routed: AtomicU64,
    pub(crate) messages_dropped: AtomicU64,
}

impl Counters {
    pub(crate) fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self, stream_id_wraps: u64, live_items: usize, uptime: Duration) -> EngineStats {
        EngineStats {
            items_opened: self.items_opened.load(Ordering::Relaxed),
            items_removed: self.items_removed.load(Ordering::Relaxed),
            deferred_delivered: self.deferred_delivered.load(Ordering::Relaxed),
            messages_routed: self.messages_routed.load(Ordering::Relaxed),
            messages_dropped: self.messages_dropped.load(Ordering::Relaxed),
            stream_id_wraps,
            live_items: live_items as u64,
            uptime,
        }
    }
}
