//! Deferred status scheduler
//!
//! Timers are kept in a deadline-ordered queue and polled from the dispatch
//! loop. Each item has at most one timer of each kind; cancelling removes the
//! entry from the queue outright.

use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use crate::msg::{DataState, State, StreamState};
use crate::registry::ItemId;

/// Kind of per-item timer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKind {
    /// Deliver the item's pending synthetic status
    ClosedStatus,
    /// A provider-originated request went unanswered
    RequestTimeout,
}

/// Synthetic terminal status waiting to be delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredStatus {
    pub state: State,
}

impl DeferredStatus {
    /// Non-recoverable close (bad request, unknown service)
    pub fn closed(text: impl Into<String>) -> Self {
        Self {
            state: State::new(StreamState::Closed, DataState::Suspect, text),
        }
    }

    /// Recoverable close (service or channel lost)
    pub fn closed_recover(text: impl Into<String>) -> Self {
        Self {
            state: State::new(StreamState::ClosedRecover, DataState::Suspect, text),
        }
    }

    /// Close of a batch handle whose members were opened individually
    pub fn batch_closed() -> Self {
        Self {
            state: State::new(StreamState::Closed, DataState::Ok, "Stream closed for batch"),
        }
    }
}

type Slot = (Instant, u64);

/// Deadline queue of per-item timers
#[derive(Debug, Default)]
pub struct DeferredStatusScheduler {
    queue: BTreeMap<Slot, (ItemId, TimerKind)>,
    index: HashMap<(ItemId, TimerKind), Slot>,
    seq: u64,
}

impl DeferredStatusScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Arm a timer; ignored (returns false) if one of this kind is pending
    pub fn schedule(&mut self, item: ItemId, kind: TimerKind, deadline: Instant) -> bool {
        if self.index.contains_key(&(item, kind)) {
            return false;
        }
        let slot = (deadline, self.seq);
        self.seq += 1;
        self.queue.insert(slot, (item, kind));
        self.index.insert((item, kind), slot);
        true
    }

    /// Disarm a timer; returns whether one was pending
    pub fn cancel(&mut self, item: ItemId, kind: TimerKind) -> bool {
        match self.index.remove(&(item, kind)) {
            Some(slot) => {
                self.queue.remove(&slot);
                true
            }
            None => false,
        }
    }

    /// Disarm every timer of an item
    pub fn cancel_all(&mut self, item: ItemId) {
        self.cancel(item, TimerKind::ClosedStatus);
        self.cancel(item, TimerKind::RequestTimeout);
    }

    pub fn is_scheduled(&self, item: ItemId, kind: TimerKind) -> bool {
        self.index.contains_key(&(item, kind))
    }

    /// Remove and return every timer due at `now`, earliest first
    pub fn pop_due(&mut self, now: Instant) -> Vec<(ItemId, TimerKind)> {
        let mut due = Vec::new();
        while let Some(entry) = self.queue.first_entry() {
            if entry.key().0 > now {
                break;
            }
            let (item, kind) = entry.remove();
            self.index.remove(&(item, kind));
            due.push((item, kind));
        }
        due
    }

    /// Earliest pending deadline
    pub fn next_deadline(&self) -> Option<Instant> {
        self.queue.keys().next().map(|(deadline, _)| *deadline)
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}
