//! Generational arena for graph entities.
//!
//! Blocks, properties, and binding-chain nodes reference each other freely
//! (a property holds its owner block, a chain holds the property it watches,
//! listeners point back at dependents). Storing every entity in an arena and
//! linking by id keeps the graph cycle-safe without reference counting, and
//! the generation counter turns use-after-destroy into a failed lookup.

use std::marker::PhantomData;

use crate::types::ids::ArenaId;

struct Entry<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot-reusing arena addressed by a typed generational id.
pub(crate) struct Arena<T, I: ArenaId> {
    entries: Vec<Entry<T>>,
    free_list: Vec<u32>,
    len: usize,
    _id: PhantomData<I>,
}

impl<T, I: ArenaId> Arena<T, I> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            free_list: Vec::new(),
            len: 0,
            _id: PhantomData,
        }
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.len
    }

    /// Store `value`, reusing a freed slot when one is available.
    pub fn alloc(&mut self, value: T) -> I {
        self.len += 1;
        if let Some(index) = self.free_list.pop() {
            let entry = &mut self.entries[index as usize];
            entry.value = Some(value);
            I::compose(index, entry.generation)
        } else {
            let index = self.entries.len() as u32;
            self.entries.push(Entry {
                generation: 0,
                value: Some(value),
            });
            I::compose(index, 0)
        }
    }

    /// Remove the entry for `id`, returning its value.
    ///
    /// Bumps the slot generation so every outstanding copy of `id` goes
    /// stale immediately. Returns `None` if `id` is already stale.
    pub fn free(&mut self, id: I) -> Option<T> {
        let entry = self.entries.get_mut(id.index() as usize)?;
        if entry.generation != id.generation() || entry.value.is_none() {
            return None;
        }
        let value = entry.value.take();
        entry.generation = entry.generation.wrapping_add(1);
        self.free_list.push(id.index());
        self.len -= 1;
        value
    }

    pub fn contains(&self, id: I) -> bool {
        self.get(id).is_some()
    }

    pub fn get(&self, id: I) -> Option<&T> {
        let entry = self.entries.get(id.index() as usize)?;
        if entry.generation != id.generation() {
            return None;
        }
        entry.value.as_ref()
    }

    pub fn get_mut(&mut self, id: I) -> Option<&mut T> {
        let entry = self.entries.get_mut(id.index() as usize)?;
        if entry.generation != id.generation() {
            return None;
        }
        entry.value.as_mut()
    }

    /// Iterate over live `(id, value)` pairs in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (I, &T)> {
        self.entries.iter().enumerate().filter_map(|(i, entry)| {
            entry
                .value
                .as_ref()
                .map(|v| (I::compose(i as u32, entry.generation), v))
        })
    }
}

impl<T, I: ArenaId> Default for Arena<T, I> {
    fn default() -> Self {
        Self::new()
    }
}
