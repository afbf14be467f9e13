//! Uniform memory blocks lent out by value.

use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicU32, Ordering};

use crate::PoolError;

static NEXT_POOL_ID: AtomicU32 = AtomicU32::new(1);

/// A block of `block_len` elements owned by the holder until released.
///
/// Blocks are `Send` when `T` is, so they can be filled on a worker thread and
/// handed back to the pool on the owning thread.
#[derive(Debug)]
pub struct Block<T> {
    data: Box<[T]>,
    pool_id: u32,
    slot: u32,
}

impl<T> Block<T> {
    /// Index of the slot this block occupies in its pool.
    pub fn slot(&self) -> usize {
        self.slot as usize
    }
}

impl<T> Deref for Block<T> {
    type Target = [T];

    fn deref(&self) -> &[T] {
        &self.data
    }
}

impl<T> DerefMut for Block<T> {
    fn deref_mut(&mut self) -> &mut [T] {
        &mut self.data
    }
}

/// A fixed number of equally sized blocks, allocated once.
pub struct BlockPool<T> {
    id: u32,
    name: String,
    block_len: usize,
    /// `Some` while the block rests in the pool, `None` while it is lent out.
    slots: Vec<Option<Box<[T]>>>,
    in_use: usize,
    high_water: usize,
}

impl<T: Copy + Default> BlockPool<T> {
    /// Preallocate `capacity` zeroed blocks of `block_len` elements each.
    pub fn new(name: impl Into<String>, block_len: usize, capacity: usize) -> Self {
        let slots = (0..capacity)
            .map(|_| Some(vec![T::default(); block_len].into_boxed_slice()))
            .collect();
        Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            name: name.into(),
            block_len,
            slots,
            in_use: 0,
            high_water: 0,
        }
    }
}

impl<T> BlockPool<T> {
    /// Lend out the first free block.
    pub fn acquire(&mut self) -> Result<Block<T>, PoolError> {
        let found = self
            .slots
            .iter_mut()
            .enumerate()
            .find_map(|(slot, resting)| resting.take().map(|data| (slot, data)));
        let Some((slot, data)) = found else {
            return Err(PoolError::Exhausted {
                pool: self.name.clone(),
                capacity: self.slots.len(),
            });
        };
        self.in_use += 1;
        self.high_water = self.high_water.max(self.in_use);
        Ok(Block {
            data,
            pool_id: self.id,
            slot: slot as u32,
        })
    }

    /// Take a block back. Its contents are left as the holder wrote them.
    pub fn release(&mut self, block: Block<T>) -> Result<(), PoolError> {
        if block.pool_id != self.id {
            return Err(PoolError::ForeignItem(self.name.clone()));
        }
        let slot = block.slot();
        match self.slots.get_mut(slot) {
            Some(resting @ None) => {
                *resting = Some(block.data);
                self.in_use -= 1;
                Ok(())
            }
            _ => Err(PoolError::NotBusy {
                pool: self.name.clone(),
                slot,
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Number of elements in every block.
    pub fn block_len(&self) -> usize {
        self.block_len
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of blocks currently lent out.
    pub fn in_use(&self) -> usize {
        self.in_use
    }

    pub fn free_count(&self) -> usize {
        self.slots.len() - self.in_use
    }

    /// Largest number of blocks lent out at the same time.
    pub fn high_water(&self) -> usize {
        self.high_water
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn test_blocks_are_preallocated_and_zeroed() {
        let mut pool = BlockPool::<f32>::new("staging", 12, 2);
        assert_eq!(pool.free_count(), 2);
        let block = pool.acquire().unwrap();
        assert_eq!(block.len(), 12);
        assert!(block.iter().all(|&v| v == 0.0));
        assert_eq!(pool.in_use(), 1);
    }

    #[test]
    fn test_exhaustion_and_reuse() {
        let mut pool = BlockPool::<u8>::new("staging", 4, 2);
        let a = pool.acquire().unwrap();
        let b = pool.acquire().unwrap();
        assert!(matches!(pool.acquire(), Err(PoolError::Exhausted { .. })));

        let slot_a = a.slot();
        pool.release(a).unwrap();
        let c = pool.acquire().unwrap();
        assert_eq!(c.slot(), slot_a);
        pool.release(b).unwrap();
        pool.release(c).unwrap();
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.high_water(), 2);
    }

    #[test]
    fn test_contents_survive_release() {
        let mut pool = BlockPool::<u32>::new("staging", 3, 1);
        let mut block = pool.acquire().unwrap();
        block.copy_from_slice(&[1, 2, 3]);
        pool.release(block).unwrap();
        let again = pool.acquire().unwrap();
        assert_eq!(&*again, &[1, 2, 3]);
    }

    #[test]
    fn test_foreign_block_rejected() {
        let mut first = BlockPool::<u8>::new("first", 4, 1);
        let mut second = BlockPool::<u8>::new("second", 4, 1);
        let block = first.acquire().unwrap();
        assert_eq!(
            second.release(block),
            Err(PoolError::ForeignItem("second".into()))
        );
        assert_eq!(second.in_use(), 0);
    }

    #[test]
    fn test_concurrent_acquire_release_never_shares_a_block() {
        const THREADS: usize = 8;
        const ROUNDS: usize = 500;

        let pool = Arc::new(Mutex::new(BlockPool::<u64>::new("shared", 16, 4)));
        let handles: Vec<_> = (0..THREADS)
            .map(|t| {
                let pool = Arc::clone(&pool);
                std::thread::spawn(move || {
                    let tag = t as u64 + 1;
                    for _ in 0..ROUNDS {
                        let acquired = pool.lock().unwrap().acquire();
                        let Ok(mut block) = acquired else {
                            std::thread::yield_now();
                            continue;
                        };
                        block.fill(tag);
                        std::thread::yield_now();
                        assert!(block.iter().all(|&v| v == tag));
                        let mut pool = pool.lock().unwrap();
                        assert!(pool.in_use() <= pool.capacity());
                        pool.release(block).unwrap();
                    }
                })
            })
            .collect();

        for handle in handles {
            handle.join().unwrap();
        }
        let pool = pool.lock().unwrap();
        assert_eq!(pool.in_use(), 0);
        assert_eq!(pool.free_count(), 4);
    }
}
