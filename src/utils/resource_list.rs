use std::marker::PhantomData;

use super::handle::{Handle, Pool};

/// Pool of entries addressed through handles of the marker type `M`.
///
/// Registries store backend-specific entry structs while handing out
/// backend-agnostic `Handle<M>` values, so commands can reference resources
/// without naming the backend.
pub struct ResourceList<T, M = T> {
    pub pool: Pool<T>,
    _marker: PhantomData<fn() -> M>,
}

impl<T, M> Default for ResourceList<T, M> {
    fn default() -> Self {
        Self {
            pool: Default::default(),
            _marker: PhantomData,
        }
    }
}

impl<T, M> ResourceList<T, M> {
    pub fn new(size: usize) -> Self {
        Self {
            pool: Pool::new(size),
            _marker: PhantomData,
        }
    }

    pub fn push(&mut self, v: T) -> Option<Handle<M>> {
        Some(self.pool.insert(v)?.retag())
    }

    pub fn release(&mut self, h: Handle<M>) -> Option<T> {
        self.pool.release(h.retag())
    }

    pub fn len(&self) -> usize {
        self.pool.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pool.is_empty()
    }

    pub fn contains(&self, h: Handle<M>) -> bool {
        self.pool.is_live(h.retag())
    }

    pub fn get_ref(&self, h: Handle<M>) -> Option<&T> {
        self.pool.get_ref(h.retag())
    }

    pub fn get_ref_mut(&mut self, h: Handle<M>) -> Option<&mut T> {
        self.pool.get_mut_ref(h.retag())
    }

    pub fn get_many_mut(&mut self, handles: &[Handle<M>]) -> Option<Vec<&mut T>> {
        let raw: Vec<Handle<T>> = handles.iter().map(|h| h.retag()).collect();
        self.pool.get_many_mut(&raw)
    }

    pub fn iter_mut(&mut self) -> impl Iterator<Item = (Handle<M>, &mut T)> + '_ {
        self.pool.iter_mut().map(|(h, v)| (h.retag(), v))
    }

    /// Removes every entry, returning them in slot order.
    pub fn drain(&mut self) -> Vec<T> {
        self.pool.drain()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    enum Marker {}

    #[test]
    fn push_and_get_round_trip() {
        let mut list: ResourceList<u32, Marker> = ResourceList::default();
        let handle = list.push(42u32).unwrap();
        assert_eq!(list.get_ref(handle), Some(&42));
        *list.get_ref_mut(handle).unwrap() = 7;
        assert_eq!(list.get_ref(handle), Some(&7));
    }

    #[test]
    fn release_removes_entries() {
        let mut list: ResourceList<&str> = ResourceList::new(4);
        let handle_a = list.push("a").unwrap();
        let handle_b = list.push("b").unwrap();

        assert_eq!(list.release(handle_a), Some("a"));
        assert_eq!(list.len(), 1);
        assert!(!list.contains(handle_a));
        assert_eq!(list.get_ref(handle_b), Some(&"b"));
    }

    #[test]
    fn drain_empties_list() {
        let mut list: ResourceList<u8> = ResourceList::new(2);
        list.push(1).unwrap();
        list.push(2).unwrap();
        assert_eq!(list.drain(), vec![1, 2]);
        assert!(list.is_empty());
    }
}
