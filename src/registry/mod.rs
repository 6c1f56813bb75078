//! Item registry
//!
//! Everything that decides whether a stream is alive lives here: the
//! [`IdAllocator`] hands out handles and wire stream ids, the [`ItemPool`]
//! owns item storage, and the [`ItemRegistry`] maps both kinds of id back to
//! the owning item.
//!
//! # Architecture
//!
//! ```text
//!                   ItemRegistry
//!          ┌──────────────────────────────┐
//!          │ by_handle: Handle   -> ItemId│
//!          │ by_stream: StreamId -> ItemId│
//!          │ items: ItemPool<Item>        │
//!          │   (slab + generation/slot)   │
//!          └──────────────┬───────────────┘
//!                         │
//!        ┌────────────────┼────────────────┐
//!        ▼                ▼                ▼
//!  register_client   MessageRouter   deferred timers
//!  (handle first,    lookup_by_stream  lookup by ItemId
//!   then stream id)
//! ```
//!
//! An [`ItemId`] carries the slot generation, so an id kept by a timer or a
//! child item stops resolving the moment its item is removed, even if the
//! slot has been reused since.

pub mod ids;
pub mod pool;
pub mod store;

use std::fmt;

pub use ids::IdAllocator;
pub use pool::{ItemId, ItemPool};
pub use store::ItemRegistry;

/// Wire-level stream identifier, scoped to the session
pub type StreamId = i32;

/// Application-visible identifier of a registered item
///
/// Handles are positive 63-bit values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Handle(u64);

impl Handle {
    /// Wrap a raw handle value
    pub fn new(value: u64) -> Self {
        Self(value)
    }

    /// Raw handle value
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Handle> for u64 {
    fn from(handle: Handle) -> u64 {
        handle.0
    }
}
