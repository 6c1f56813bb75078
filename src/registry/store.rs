//! Item registry implementation
//!
//! Single source of truth for "is this stream alive": an item is live exactly
//! while it sits in the pool, and its handle and stream id map entries point
//! at it.

use std::collections::HashMap;

use super::pool::{ItemId, ItemPool};
use super::{Handle, StreamId};
use crate::item::Item;

/// Maps handles and stream ids to items
///
/// Not synchronized itself; the engine keeps it behind its user lock.
#[derive(Debug, Default)]
pub struct ItemRegistry {
    items: ItemPool<Item>,
    by_handle: HashMap<Handle, ItemId>,
    by_stream: HashMap<StreamId, ItemId>,
}

impl ItemRegistry {
    /// Create a registry sized for `capacity` items
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            items: ItemPool::with_capacity(capacity),
            by_handle: HashMap::with_capacity(capacity),
            by_stream: HashMap::with_capacity(capacity),
        }
    }

    /// Store an item under a handle
    pub fn register(&mut self, handle: Handle, mut item: Item) -> ItemId {
        item.handle = Some(handle);
        item.stream_id = None;
        let id = self.items.insert(item);
        self.by_handle.insert(handle, id);

        tracing::trace!(handle = %handle, "Added item to handle map");
        id
    }

    /// Store an item under a handle and a stream id
    pub fn register_with_stream(&mut self, handle: Handle, stream_id: StreamId, item: Item) -> ItemId {
        let id = self.register(handle, item);
        self.bind_stream(id, stream_id);
        id
    }

    /// Attach a stream id to an already registered item
    ///
    /// Returns false if the item is gone.
    pub fn bind_stream(&mut self, id: ItemId, stream_id: StreamId) -> bool {
        let Some(item) = self.items.get_mut(id) else {
            return false;
        };
        if let Some(old) = item.stream_id.replace(stream_id) {
            self.by_stream.remove(&old);
        }
        if let Some(displaced) = self.by_stream.insert(stream_id, id) {
            if displaced != id {
                tracing::error!(stream_id, "Stream id was already mapped to a live item");
            }
        }

        tracing::trace!(stream_id, "Added item to stream id map");
        true
    }

    /// Detach the stream id from an item that stays registered
    pub fn unbind_stream(&mut self, id: ItemId) -> Option<StreamId> {
        let stream_id = self.items.get_mut(id)?.stream_id.take()?;
        if self.by_stream.get(&stream_id) == Some(&id) {
            self.by_stream.remove(&stream_id);
        }
        Some(stream_id)
    }

    pub fn lookup_by_handle(&self, handle: Handle) -> Option<ItemId> {
        self.by_handle.get(&handle).copied()
    }

    pub fn lookup_by_stream(&self, stream_id: StreamId) -> Option<ItemId> {
        self.by_stream.get(&stream_id).copied()
    }

    pub fn get(&self, id: ItemId) -> Option<&Item> {
        self.items.get(id)
    }

    pub fn get_mut(&mut self, id: ItemId) -> Option<&mut Item> {
        self.items.get_mut(id)
    }

    pub fn contains(&self, id: ItemId) -> bool {
        self.items.contains(id)
    }

    /// Unlink an item from both maps and take it out of the pool
    ///
    /// Removing an item twice, or one that was never registered, returns
    /// `None` and leaves the maps untouched.
    pub fn remove(&mut self, id: ItemId) -> Option<Item> {
        let mut item = self.items.remove(id)?;

        if let Some(handle) = item.handle.take() {
            if self.by_handle.get(&handle) == Some(&id) {
                self.by_handle.remove(&handle);
            }
        }
        if let Some(stream_id) = item.stream_id.take() {
            if self.by_stream.get(&stream_id) == Some(&id) {
                self.by_stream.remove(&stream_id);
            }
        }

        tracing::trace!(kind = item.kind.name(), "Removed item from registry");
        Some(item)
    }

    pub fn handle_in_use(&self, handle: Handle) -> bool {
        self.by_handle.contains_key(&handle)
    }

    pub fn stream_in_use(&self, stream_id: StreamId) -> bool {
        self.by_stream.contains_key(&stream_id)
    }

    /// Number of live items
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Number of entries in the stream id map
    pub fn stream_count(&self) -> usize {
        self.by_stream.len()
    }

    /// Ids of every live item
    pub fn ids(&self) -> Vec<ItemId> {
        self.items.ids()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ItemId, &Item)> {
        self.items.iter()
    }
}
