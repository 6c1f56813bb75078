//! Handle and stream id allocation
//!
//! Both counters are monotonic until they run off the end of their space.
//! After the first wrap every candidate is checked against the live set,
//! because the low values may still be held by long-lived streams.

use std::sync::atomic::{AtomicBool, AtomicI32, AtomicU64, Ordering};

use parking_lot::Mutex;

use super::{Handle, StreamId};
use crate::error::{Error, Result};

/// Smallest handle ever returned
pub const MIN_HANDLE: u64 = 1;

/// Largest handle ever returned (63-bit)
pub const MAX_HANDLE: u64 = i64::MAX as u64;

/// First stream id handed out for consumer and non-interactive provider items
///
/// Ids 1 to 3 carry login, directory and dictionary.
pub const CONSUMER_FIRST_STREAM_ID: StreamId = 4;

/// First stream id magnitude for interactive-provider requests
pub const PROVIDER_FIRST_STREAM_ID: StreamId = 1;

/// Largest stream id magnitude ever returned
pub const MAX_STREAM_ID: StreamId = i32::MAX - 1;

/// Allocator for handles and stream ids
///
/// The monotonic paths are lock-free. Once the stream id space has wrapped,
/// allocation probes for a free id under `probe_lock`; the flag never resets
/// for the lifetime of the allocator.
#[derive(Debug)]
pub struct IdAllocator {
    /// Next handle to hand out
    next_handle: AtomicU64,
    handle_wrapped: AtomicBool,

    /// Last stream id magnitude handed out
    last_stream_id: AtomicI32,
    first_stream_id: StreamId,
    /// Provider-originated ids go out negated
    negate: bool,
    stream_wrapped: AtomicBool,
    probe_lock: Mutex<()>,

    /// Number of times the stream id space wrapped
    wraps: AtomicU64,
}

impl IdAllocator {
    /// Allocator for consumer and non-interactive provider sessions
    pub fn consumer() -> Self {
        Self::new(CONSUMER_FIRST_STREAM_ID, false)
    }

    /// Allocator for interactive provider sessions (negative stream ids)
    pub fn provider() -> Self {
        Self::new(PROVIDER_FIRST_STREAM_ID, true)
    }

    fn new(first_stream_id: StreamId, negate: bool) -> Self {
        Self {
            next_handle: AtomicU64::new(MIN_HANDLE),
            handle_wrapped: AtomicBool::new(false),
            last_stream_id: AtomicI32::new(first_stream_id - 1),
            first_stream_id,
            negate,
            stream_wrapped: AtomicBool::new(false),
            probe_lock: Mutex::new(()),
            wraps: AtomicU64::new(0),
        }
    }

    /// Whether stream ids are negated
    pub fn is_provider(&self) -> bool {
        self.negate
    }

    /// Whether the stream id space has wrapped at least once
    pub fn stream_ids_wrapped(&self) -> bool {
        self.stream_wrapped.load(Ordering::Acquire)
    }

    /// Number of stream id wraps so far
    pub fn wrap_count(&self) -> u64 {
        self.wraps.load(Ordering::Relaxed)
    }

    /// Next free handle
    ///
    /// `in_use` reports whether a handle is held by a live item and `live` is
    /// the number of live items; at most `live + 1` candidates are probed.
    pub fn next_handle(&self, live: usize, in_use: impl Fn(Handle) -> bool) -> Result<Handle> {
        let first = self.bump_handle();
        if !self.handle_wrapped.load(Ordering::Acquire) {
            return Ok(first);
        }

        let mut candidate = first;
        for _ in 0..=live {
            if !in_use(candidate) {
                return Ok(candidate);
            }
            candidate = self.bump_handle();
        }

        tracing::error!(live, "Unable to obtain next available handle");
        Err(Error::HandlesExhausted)
    }

    fn bump_handle(&self) -> Handle {
        let mut current = self.next_handle.load(Ordering::Relaxed);
        loop {
            let next = if current >= MAX_HANDLE {
                MIN_HANDLE
            } else {
                current + 1
            };
            match self.next_handle.compare_exchange_weak(
                current,
                next,
                Ordering::AcqRel,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    if next == MIN_HANDLE {
                        self.handle_wrapped.store(true, Ordering::Release);
                        tracing::debug!("Handle space wrapped");
                    }
                    return Handle(current);
                }
                Err(actual) => current = actual,
            }
        }
    }

    /// Whether reserving `1 + extra` contiguous ids is impossible, so a batch
    /// of `extra` items must be opened as individual requests
    pub fn must_split_batch(&self, extra: u32) -> bool {
        if self.stream_ids_wrapped() {
            return true;
        }
        let last = self.last_stream_id.load(Ordering::Acquire) as i64;
        last + 1 + extra as i64 > MAX_STREAM_ID as i64
    }

    /// Reserve `1 + extra` contiguous stream ids and return the first
    ///
    /// Before the space wraps this is a lock-free bump of the counter. After
    /// it wraps, only single ids can be handed out (`extra` must be zero) and
    /// each is probed against `in_use`, at most `live + 1` candidates.
    pub fn next_stream_id(
        &self,
        extra: u32,
        live: usize,
        in_use: impl Fn(StreamId) -> bool,
    ) -> Result<StreamId> {
        if !self.stream_ids_wrapped() {
            let mut last = self.last_stream_id.load(Ordering::Acquire);
            loop {
                let end = last as i64 + 1 + extra as i64;
                if end > MAX_STREAM_ID as i64 {
                    break;
                }
                match self.last_stream_id.compare_exchange_weak(
                    last,
                    end as StreamId,
                    Ordering::AcqRel,
                    Ordering::Acquire,
                ) {
                    Ok(_) => return Ok(self.signed(last + 1)),
                    Err(actual) => last = actual,
                }
            }
            self.wrap();
        }

        if extra > 0 {
            return Err(Error::invalid_usage(
                crate::error::ErrorCode::InternalError,
                "Contiguous stream ids requested after wraparound",
            ));
        }
        self.probe(live, in_use)
    }

    fn wrap(&self) {
        let _guard = self.probe_lock.lock();
        if self.stream_wrapped.swap(true, Ordering::AcqRel) {
            return;
        }
        self.last_stream_id
            .store(self.first_stream_id - 1, Ordering::Release);
        self.wraps.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(
            first = self.first_stream_id,
            "Reach max number available for next stream id, will wrap around"
        );
    }

    fn probe(&self, live: usize, in_use: impl Fn(StreamId) -> bool) -> Result<StreamId> {
        let _guard = self.probe_lock.lock();
        let space = (MAX_STREAM_ID - self.first_stream_id + 1) as usize;
        let mut last = self.last_stream_id.load(Ordering::Acquire);

        for _ in 0..live.saturating_add(1).min(space) {
            last = if last >= MAX_STREAM_ID {
                self.wraps.fetch_add(1, Ordering::Relaxed);
                self.first_stream_id
            } else {
                last + 1
            };
            let candidate = self.signed(last);
            if !in_use(candidate) {
                self.last_stream_id.store(last, Ordering::Release);
                return Ok(candidate);
            }
        }

        self.last_stream_id.store(last, Ordering::Release);
        tracing::error!(live, "Unable to obtain next available stream id for item request");
        Err(Error::StreamIdsExhausted)
    }

    fn signed(&self, magnitude: StreamId) -> StreamId {
        if self.negate {
            -magnitude
        } else {
            magnitude
        }
    }

    /// Move the stream id counter so the next id handed out is `next`
    #[cfg(test)]
    pub(crate) fn force_next_stream_id(&self, next: StreamId) {
        self.last_stream_id.store(next - 1, Ordering::Release);
    }

    /// Move the handle counter so the next handle handed out is `next`
    #[cfg(test)]
    pub(crate) fn force_next_handle(&self, next: u64) {
        self.next_handle.store(next, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use tokio_test::{assert_err, assert_ok};

    use super::*;

    #[test]
    fn test_consumer_ids_start_after_reserved_streams() {
        let ids = IdAllocator::consumer();
        assert_eq!(assert_ok!(ids.next_stream_id(0, 0, |_| false)), 4);
        assert_eq!(assert_ok!(ids.next_stream_id(0, 0, |_| false)), 5);
    }

    #[test]
    fn test_provider_ids_are_negative() {
        let ids = IdAllocator::provider();
        assert_eq!(assert_ok!(ids.next_stream_id(0, 0, |_| false)), -1);
        assert_eq!(assert_ok!(ids.next_stream_id(0, 0, |_| false)), -2);
    }

    #[test]
    fn test_batch_reservation_is_contiguous() {
        let ids = IdAllocator::consumer();
        let batch = assert_ok!(ids.next_stream_id(3, 0, |_| false));
        assert_eq!(batch, 4);
        // 4 is the batch stream, 5..=7 its members
        assert_eq!(assert_ok!(ids.next_stream_id(0, 0, |_| false)), 8);
    }

    #[test]
    fn test_must_split_near_boundary() {
        let ids = IdAllocator::consumer();
        ids.force_next_stream_id(MAX_STREAM_ID - 2);
        assert!(!ids.must_split_batch(2));
        assert!(ids.must_split_batch(3));
    }

    #[test]
    fn test_wraparound_never_returns_live_id() {
        let ids = IdAllocator::consumer();
        let k = 3;
        ids.force_next_stream_id(MAX_STREAM_ID - k + 1);

        // Long-lived streams still hold the low ids
        let mut live: HashSet<StreamId> = (4..10).collect();

        for _ in 0..k + 5 {
            let id = assert_ok!(ids.next_stream_id(0, live.len(), |id| live.contains(&id)));
            assert!(live.insert(id), "duplicate stream id {id}");
        }

        assert!(ids.stream_ids_wrapped());
        assert_eq!(ids.wrap_count(), 1);
        assert!(ids.must_split_batch(0));
    }

    #[test]
    fn test_probe_is_bounded() {
        let ids = IdAllocator::consumer();
        ids.force_next_stream_id(MAX_STREAM_ID + 1);
        let result = ids.next_stream_id(0, 16, |_| true);
        assert!(matches!(result, Err(Error::StreamIdsExhausted)));
    }

    #[test]
    fn test_handles_skip_live_after_wrap() {
        let ids = IdAllocator::consumer();
        ids.force_next_handle(MAX_HANDLE);

        assert_eq!(assert_ok!(ids.next_handle(0, |_| false)).get(), MAX_HANDLE);

        let live: HashSet<u64> = [1, 2].into_iter().collect();
        let handle = assert_ok!(ids.next_handle(live.len(), |h| live.contains(&h.get())));
        assert_eq!(handle.get(), 3);
    }

    #[test]
    fn test_handle_exhaustion() {
        let ids = IdAllocator::consumer();
        ids.force_next_handle(MAX_HANDLE);
        assert_ok!(ids.next_handle(0, |_| false));
        assert_err!(ids.next_handle(4, |_| true));
    }
}
