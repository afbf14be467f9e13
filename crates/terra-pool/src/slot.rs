//! Typed fixed-capacity arena addressed by generational handles.

use std::ops::{Index, IndexMut};

use crate::PoolError;

/// Handle to a value stored in a [`SlotPool`].
///
/// The generation guards against use after release: a handle to a released
/// slot never resolves, even after the slot is reused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlotId {
    index: u32,
    generation: u32,
}

impl SlotId {
    /// Raw slot index, stable for the lifetime of the value.
    pub fn index(self) -> usize {
        self.index as usize
    }
}

enum Entry<T> {
    Occupied { generation: u32, value: T },
    Vacant { generation: u32 },
}

/// A fixed number of slots holding values of type `T` in place.
///
/// Storage is reserved up front and never grows. Acquiring from a full pool
/// fails with [`PoolError::Exhausted`].
pub struct SlotPool<T> {
    name: String,
    entries: Vec<Entry<T>>,
    /// Vacant slot indices, lowest index on top.
    free: Vec<u32>,
    len: usize,
}

impl<T> SlotPool<T> {
    /// Create a pool with room for `capacity` values.
    pub fn with_capacity(name: impl Into<String>, capacity: usize) -> Self {
        let mut entries = Vec::with_capacity(capacity);
        entries.resize_with(capacity, || Entry::Vacant { generation: 0 });
        Self {
            name: name.into(),
            entries,
            free: (0..capacity as u32).rev().collect(),
            len: 0,
        }
    }

    /// Store `value` in a vacant slot.
    pub fn acquire(&mut self, value: T) -> Result<SlotId, PoolError> {
        let Some(index) = self.free.pop() else {
            return Err(PoolError::Exhausted {
                pool: self.name.clone(),
                capacity: self.entries.len(),
            });
        };
        let entry = &mut self.entries[index as usize];
        let generation = match *entry {
            Entry::Vacant { generation } => generation,
            Entry::Occupied { .. } => unreachable!("free list points at an occupied slot"),
        };
        *entry = Entry::Occupied { generation, value };
        self.len += 1;
        Ok(SlotId { index, generation })
    }

    /// Take the value out of its slot and make the slot available again.
    pub fn release(&mut self, id: SlotId) -> Result<T, PoolError> {
        if !self.contains(id) {
            return Err(PoolError::NotBusy {
                pool: self.name.clone(),
                slot: id.index(),
            });
        }
        let vacant = Entry::Vacant {
            generation: id.generation.wrapping_add(1),
        };
        let entry = &mut self.entries[id.index()];
        let Entry::Occupied { value, .. } = std::mem::replace(entry, vacant) else {
            unreachable!()
        };
        self.free.push(id.index);
        self.len -= 1;
        Ok(value)
    }

    pub fn get(&self, id: SlotId) -> Option<&T> {
        match self.entries.get(id.index())? {
            Entry::Occupied { generation, value } if *generation == id.generation => Some(value),
            _ => None,
        }
    }

    pub fn get_mut(&mut self, id: SlotId) -> Option<&mut T> {
        match self.entries.get_mut(id.index())? {
            Entry::Occupied { generation, value } if *generation == id.generation => Some(value),
            _ => None,
        }
    }

    /// Returns `true` if `id` refers to a live value.
    pub fn contains(&self, id: SlotId) -> bool {
        self.get(id).is_some()
    }

    /// Number of occupied slots.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.entries.len()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Iterate over all live values in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (SlotId, &T)> {
        self.entries
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| match entry {
                Entry::Occupied { generation, value } => Some((
                    SlotId {
                        index: index as u32,
                        generation: *generation,
                    },
                    value,
                )),
                Entry::Vacant { .. } => None,
            })
    }
}

impl<T> Index<SlotId> for SlotPool<T> {
    type Output = T;

    fn index(&self, id: SlotId) -> &T {
        match self.get(id) {
            Some(value) => value,
            None => panic!("stale handle {id:?} into pool `{}`", self.name),
        }
    }
}

impl<T> IndexMut<SlotId> for SlotPool<T> {
    fn index_mut(&mut self, id: SlotId) -> &mut T {
        if !self.contains(id) {
            panic!("stale handle {id:?} into pool `{}`", self.name);
        }
        match self.get_mut(id) {
            Some(value) => value,
            None => unreachable!(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, SeedableRng};
    use rand_chacha::ChaCha8Rng;

    #[test]
    fn test_acquire_until_exhausted() {
        let mut pool = SlotPool::with_capacity("nodes", 3);
        let a = pool.acquire('a').unwrap();
        let b = pool.acquire('b').unwrap();
        let c = pool.acquire('c').unwrap();
        assert_eq!(pool.len(), 3);
        assert_eq!(
            pool.acquire('d'),
            Err(PoolError::Exhausted {
                pool: "nodes".into(),
                capacity: 3
            })
        );
        assert_eq!((pool[a], pool[b], pool[c]), ('a', 'b', 'c'));
    }

    #[test]
    fn test_lowest_free_slot_first() {
        let mut pool = SlotPool::with_capacity("nodes", 4);
        let ids: Vec<_> = (0..4).map(|i| pool.acquire(i).unwrap()).collect();
        assert_eq!(ids.iter().map(|id| id.index()).collect::<Vec<_>>(), [0, 1, 2, 3]);
        pool.release(ids[1]).unwrap();
        let reused = pool.acquire(10).unwrap();
        assert_eq!(reused.index(), 1);
    }

    #[test]
    fn test_stale_handle_does_not_resolve() {
        let mut pool = SlotPool::with_capacity("nodes", 1);
        let old = pool.acquire(1u32).unwrap();
        assert_eq!(pool.release(old), Ok(1));
        let new = pool.acquire(2u32).unwrap();
        assert_eq!(old.index(), new.index());
        assert!(pool.get(old).is_none());
        assert_eq!(pool.get(new), Some(&2));
    }

    #[test]
    fn test_double_release_is_reported() {
        let mut pool = SlotPool::with_capacity("nodes", 2);
        let id = pool.acquire(()).unwrap();
        pool.release(id).unwrap();
        assert_eq!(
            pool.release(id),
            Err(PoolError::NotBusy {
                pool: "nodes".into(),
                slot: 0
            })
        );
        assert!(pool.is_empty());
    }

    #[test]
    #[should_panic(expected = "stale handle")]
    fn test_index_with_stale_handle_panics() {
        let mut pool = SlotPool::with_capacity("nodes", 1);
        let id = pool.acquire(5).unwrap();
        pool.release(id).unwrap();
        let _ = pool[id];
    }

    #[test]
    fn test_random_sequence_matches_model() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let mut pool = SlotPool::with_capacity("nodes", 16);
        let mut live: Vec<(SlotId, u64)> = Vec::new();

        for step in 0..2000u64 {
            if rng.random_bool(0.55) {
                match pool.acquire(step) {
                    Ok(id) => live.push((id, step)),
                    Err(PoolError::Exhausted { .. }) => assert_eq!(live.len(), 16),
                    Err(e) => panic!("unexpected error {e}"),
                }
            } else if !live.is_empty() {
                let (id, value) = live.swap_remove(rng.random_range(0..live.len()));
                assert_eq!(pool.release(id), Ok(value));
            }
            assert_eq!(pool.len(), live.len());
            for &(id, value) in &live {
                assert_eq!(pool[id], value);
            }
        }
        assert_eq!(pool.iter().count(), live.len());
    }
}
