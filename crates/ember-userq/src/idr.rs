//! # Queue Identifier Arena
//!
//! Integer ids with a generation stamp. An id is reserved first, the queue
//! is built, and only then is the queue published under it; until then no
//! lookup resolves it. Releasing a slot bumps its generation, so an id
//! kept past destroy never resolves to the queue that reuses the slot.

use alloc::vec::Vec;
use core::fmt;

use ember_core::{Error, Result};

/// Generation-checked queue identifier
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QueueId {
    index: u32,
    generation: u32,
}

impl QueueId {
    pub(crate) const fn new(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Integer id reported to userspace
    #[inline]
    pub const fn index(self) -> u32 {
        self.index
    }

    /// Slot generation
    #[inline]
    pub const fn generation(self) -> u32 {
        self.generation
    }
}

impl fmt::Debug for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QueueId({}#{})", self.index, self.generation)
    }
}

impl fmt::Display for QueueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.index)
    }
}

#[derive(Debug)]
enum Slot<T> {
    Free,
    Reserved,
    Occupied(T),
}

#[derive(Debug)]
struct Entry<T> {
    generation: u32,
    slot: Slot<T>,
}

/// Id allocator and table, lowest free id first
#[derive(Debug)]
pub struct IdArena<T> {
    entries: Vec<Entry<T>>,
    base: u32,
    limit: u32,
    live: usize,
}

impl<T> IdArena<T> {
    /// Ids in `[base, limit)`
    pub const fn new(base: u32, limit: u32) -> Self {
        Self {
            entries: Vec::new(),
            base,
            limit,
            live: 0,
        }
    }

    fn entry(&self, id: QueueId) -> Option<&Entry<T>> {
        let pos = id.index.checked_sub(self.base)? as usize;
        self.entries
            .get(pos)
            .filter(|entry| entry.generation == id.generation)
    }

    fn entry_mut(&mut self, id: QueueId) -> Option<&mut Entry<T>> {
        let pos = id.index.checked_sub(self.base)? as usize;
        self.entries
            .get_mut(pos)
            .filter(|entry| entry.generation == id.generation)
    }

    /// Reserve the lowest free id
    ///
    /// `OutOfMemory` when every id below the limit is taken.
    pub fn reserve(&mut self) -> Result<QueueId> {
        if let Some(pos) = self
            .entries
            .iter()
            .position(|entry| matches!(entry.slot, Slot::Free))
        {
            let entry = &mut self.entries[pos];
            entry.slot = Slot::Reserved;
            return Ok(QueueId::new(self.base + pos as u32, entry.generation));
        }

        let index = self.base + self.entries.len() as u32;
        if index >= self.limit {
            return Err(Error::OutOfMemory);
        }
        self.entries.try_reserve(1).map_err(|_| Error::OutOfMemory)?;
        self.entries.push(Entry {
            generation: 1,
            slot: Slot::Reserved,
        });
        Ok(QueueId::new(index, 1))
    }

    /// Publish `value` under a reserved id
    ///
    /// Hands `value` back if `id` is not currently reserved.
    pub fn publish(&mut self, id: QueueId, value: T) -> core::result::Result<(), T> {
        match self.entry_mut(id) {
            Some(entry) if matches!(entry.slot, Slot::Reserved) => {
                entry.slot = Slot::Occupied(value);
                self.live += 1;
                Ok(())
            }
            _ => Err(value),
        }
    }

    /// Give back a reserved id that was never published
    pub fn release(&mut self, id: QueueId) -> bool {
        match self.entry_mut(id) {
            Some(entry) if matches!(entry.slot, Slot::Reserved) => {
                entry.slot = Slot::Free;
                entry.generation = entry.generation.wrapping_add(1);
                true
            }
            _ => false,
        }
    }

    /// Unpublish and return the value under `id`, freeing the id
    pub fn remove(&mut self, id: QueueId) -> Option<T> {
        let entry = self.entry_mut(id)?;
        if !matches!(entry.slot, Slot::Occupied(_)) {
            return None;
        }
        let Slot::Occupied(value) = core::mem::replace(&mut entry.slot, Slot::Free) else {
            return None;
        };
        entry.generation = entry.generation.wrapping_add(1);
        self.live -= 1;
        Some(value)
    }

    /// Published value under `id`
    pub fn get(&self, id: QueueId) -> Option<&T> {
        match &self.entry(id)?.slot {
            Slot::Occupied(value) => Some(value),
            _ => None,
        }
    }

    /// Mutable published value under `id`
    pub fn get_mut(&mut self, id: QueueId) -> Option<&mut T> {
        match &mut self.entry_mut(id)?.slot {
            Slot::Occupied(value) => Some(value),
            _ => None,
        }
    }

    /// Current id of a published integer id
    pub fn resolve(&self, index: u32) -> Option<QueueId> {
        let pos = index.checked_sub(self.base)? as usize;
        let entry = self.entries.get(pos)?;
        match entry.slot {
            Slot::Occupied(_) => Some(QueueId::new(index, entry.generation)),
            _ => None,
        }
    }

    /// Ids of every published value, ascending
    pub fn ids(&self) -> Vec<QueueId> {
        self.entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| matches!(entry.slot, Slot::Occupied(_)))
            .map(|(pos, entry)| QueueId::new(self.base + pos as u32, entry.generation))
            .collect()
    }

    /// Number of published values
    pub fn len(&self) -> usize {
        self.live
    }

    /// Check if nothing is published
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Free every slot; generations keep counting
    pub fn clear(&mut self) {
        for entry in &mut self.entries {
            if !matches!(entry.slot, Slot::Free) {
                entry.slot = Slot::Free;
                entry.generation = entry.generation.wrapping_add(1);
            }
        }
        self.live = 0;
    }
}
