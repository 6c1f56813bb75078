//! Generation-tagged item storage
//!
//! Slots are recycled through a [`Slab`]. Each slot also carries a generation
//! counter that is bumped on removal, so a stale [`ItemId`] fails lookups
//! instead of resolving to whatever item reused the slot.

use slab::Slab;

/// Index of an item in an [`ItemPool`], tagged with the slot generation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemId {
    index: u32,
    generation: u32,
}

impl ItemId {
    /// Slot index
    pub fn index(self) -> usize {
        self.index as usize
    }

    /// Slot generation at the time the item was inserted
    pub fn generation(self) -> u32 {
        self.generation
    }
}

/// Arena of items keyed by [`ItemId`]
#[derive(Debug)]
pub struct ItemPool<T> {
    slots: Slab<(u32, T)>,
    /// Generation to stamp on the next item placed in each slot
    generations: Vec<u32>,
}

impl<T> ItemPool<T> {
    /// Create a pool with room for `capacity` items
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Slab::with_capacity(capacity),
            generations: Vec::with_capacity(capacity),
        }
    }

    /// Store an item and return its id
    pub fn insert(&mut self, value: T) -> ItemId {
        let entry = self.slots.vacant_entry();
        let index = entry.key();
        if index >= self.generations.len() {
            self.generations.resize(index + 1, 0);
        }
        let generation = self.generations[index];
        entry.insert((generation, value));

        ItemId {
            index: index as u32,
            generation,
        }
    }

    /// Borrow an item if `id` is still current
    pub fn get(&self, id: ItemId) -> Option<&T> {
        match self.slots.get(id.index()) {
            Some((generation, value)) if *generation == id.generation => Some(value),
            _ => None,
        }
    }

    /// Mutably borrow an item if `id` is still current
    pub fn get_mut(&mut self, id: ItemId) -> Option<&mut T> {
        match self.slots.get_mut(id.index()) {
            Some((generation, value)) if *generation == id.generation => Some(value),
            _ => None,
        }
    }

    /// Whether `id` still names a stored item
    pub fn contains(&self, id: ItemId) -> bool {
        self.get(id).is_some()
    }

    /// Take an item out and retire its id
    ///
    /// Returns `None` if `id` is stale, so removing twice is harmless.
    pub fn remove(&mut self, id: ItemId) -> Option<T> {
        if !self.contains(id) {
            return None;
        }
        let (_, value) = self.slots.remove(id.index());
        let generation = &mut self.generations[id.index()];
        *generation = generation.wrapping_add(1);
        Some(value)
    }

    /// Number of stored items
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Ids of every stored item, in slot order
    pub fn ids(&self) -> Vec<ItemId> {
        self.slots
            .iter()
            .map(|(index, (generation, _))| ItemId {
                index: index as u32,
                generation: *generation,
            })
            .collect()
    }

    /// Iterate over stored items
    pub fn iter(&self) -> impl Iterator<Item = (ItemId, &T)> {
        self.slots.iter().map(|(index, (generation, value))| {
            (
                ItemId {
                    index: index as u32,
                    generation: *generation,
                },
                value,
            )
        })
    }
}

impl<T> Default for ItemPool<T> {
    fn default() -> Self {
        Self::with_capacity(0)
    }
}
