use std::fmt;
use std::hash::Hash;
use std::marker::PhantomData;

/// Generational index into a [`Pool`].
///
/// A handle whose generation is zero never refers to a live entry, so
/// `Handle::default()` can be used as a "no resource" marker inside command
/// structs.
pub struct Handle<T> {
    pub slot: u16,
    pub generation: u16,
    phantom: PhantomData<fn() -> T>,
}

impl<T> Handle<T> {
    pub const fn new(slot: u16, generation: u16) -> Self {
        Self {
            slot,
            generation,
            phantom: PhantomData,
        }
    }

    pub fn valid(&self) -> bool {
        self.generation != 0
    }

    pub(crate) fn retag<U>(self) -> Handle<U> {
        Handle::new(self.slot, self.generation)
    }
}

impl<T> fmt::Debug for Handle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("slot", &self.slot)
            .field("generation", &self.generation)
            .finish()
    }
}

impl<T> PartialEq for Handle<T> {
    fn eq(&self, other: &Self) -> bool {
        self.slot == other.slot && self.generation == other.generation
    }
}

impl<T> Eq for Handle<T> {}

impl<T> Clone for Handle<T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Handle<T> {}

impl<T> Hash for Handle<T> {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.slot.hash(state);
        self.generation.hash(state);
    }
}

impl<T> Default for Handle<T> {
    fn default() -> Self {
        Self::new(0, 0)
    }
}

/// Slot allocator with generation checks.
///
/// Released slots bump their generation so stale handles stop resolving.
pub struct Pool<T> {
    items: Vec<Option<T>>,
    empty: Vec<usize>,
    generation: Vec<u16>,
    live: usize,
}

impl<T> Default for Pool<T> {
    fn default() -> Self {
        const INITIAL_SIZE: usize = 64;
        Self::new(INITIAL_SIZE)
    }
}

impl<T> Pool<T> {
    pub fn new(initial_size: usize) -> Self {
        let initial_size = initial_size.min(u16::MAX as usize);
        let mut p = Pool {
            items: Vec::with_capacity(initial_size),
            empty: Vec::with_capacity(initial_size),
            generation: vec![1; initial_size],
            live: 0,
        };

        // Lowest slots are handed out first.
        p.empty = (0..initial_size).rev().collect();
        p.items.resize_with(initial_size, || None);
        p
    }

    pub fn insert(&mut self, item: T) -> Option<Handle<T>> {
        let slot = match self.empty.pop() {
            Some(slot) => slot,
            None => {
                if self.items.len() >= u16::MAX as usize {
                    return None;
                }
                self.items.push(None);
                self.generation.push(1);
                self.items.len() - 1
            }
        };

        self.items[slot] = Some(item);
        self.live += 1;

        Some(Handle::new(slot as u16, self.generation[slot]))
    }

    /// Removes the entry behind `item`, returning it if the handle was live.
    pub fn release(&mut self, item: Handle<T>) -> Option<T> {
        let slot = item.slot as usize;
        if !self.is_live(item) {
            return None;
        }

        let value = self.items[slot].take();
        self.retire_slot(slot);
        value
    }

    fn retire_slot(&mut self, slot: usize) {
        let next = self.generation[slot].wrapping_add(1);
        self.generation[slot] = if next == 0 { 1 } else { next };
        self.empty.push(slot);
        self.live -= 1;
    }

    /// Removes every entry in slot order. Outstanding handles go stale.
    pub fn drain(&mut self) -> Vec<T> {
        let mut out = Vec::with_capacity(self.live);
        for slot in 0..self.items.len() {
            if let Some(item) = self.items[slot].take() {
                self.retire_slot(slot);
                out.push(item);
            }
        }
        out
    }

    pub fn is_live(&self, item: Handle<T>) -> bool {
        let slot = item.slot as usize;
        item.valid()
            && slot < self.items.len()
            && self.generation[slot] == item.generation
            && self.items[slot].is_some()
    }

    pub fn get_ref(&self, item: Handle<T>) -> Option<&T> {
        if !self.is_live(item) {
            return None;
        }
        self.items[item.slot as usize].as_ref()
    }

    pub fn get_mut_ref(&mut self, item: Handle<T>) -> Option<&mut T> {
        if !self.is_live(item) {
            return None;
        }
        self.items[item.slot as usize].as_mut()
    }

    /// Borrows several distinct entries mutably at once.
    ///
    /// Returns `None` if any handle is stale or appears twice. The returned
    /// references are in the same order as `handles`.
    pub fn get_many_mut(&mut self, handles: &[Handle<T>]) -> Option<Vec<&mut T>> {
        for (i, h) in handles.iter().enumerate() {
            if !self.is_live(*h) || handles[..i].iter().any(|o| o.slot == h.slot) {
                return None;
            }
        }

        let mut out: Vec<Option<&mut T>> = handles.iter().map(|_| None).collect();
        for (slot, item) in self.items.iter_mut().enumerate() {
            if let Some(pos) = handles.iter().position(|h| h.slot as usize == slot) {
                out[pos] = item.as_mut();
            }
        }

        out.into_iter().collect()
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle<T>, &mut T)> + '_ {
        let generation = &self.generation;
        self.items
            .iter_mut()
            .enumerate()
            .filter_map(move |(slot, item)| {
                item.as_mut()
                    .map(|v| (Handle::new(slot as u16, generation[slot]), v))
            })
    }

    pub fn len(&self) -> usize {
        self.live
    }

    pub fn is_empty(&self) -> bool {
        self.live == 0
    }
}
