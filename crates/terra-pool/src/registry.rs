//! Registry of named block pools.

use rustc_hash::FxHashMap;

use crate::{Block, BlockPool, PoolError};

/// Named [`BlockPool`]s, created and removed explicitly.
pub struct MemPools<T> {
    pools: FxHashMap<String, BlockPool<T>>,
}

impl<T: Copy + Default> MemPools<T> {
    pub fn new() -> Self {
        Self {
            pools: FxHashMap::default(),
        }
    }

    /// Register a pool of `capacity` blocks of `block_len` elements.
    pub fn create_pool(
        &mut self,
        name: &str,
        block_len: usize,
        capacity: usize,
    ) -> Result<(), PoolError> {
        if self.pools.contains_key(name) {
            return Err(PoolError::AlreadyExists(name.to_string()));
        }
        self.pools
            .insert(name.to_string(), BlockPool::new(name, block_len, capacity));
        log::debug!("Created memory pool `{name}`: {capacity} x {block_len} elements");
        Ok(())
    }
}

impl<T> MemPools<T> {
    /// Lend out the first free block of the named pool.
    pub fn acquire(&mut self, name: &str) -> Result<Block<T>, PoolError> {
        self.pool_mut(name)?.acquire()
    }

    /// Return a block to the named pool.
    pub fn release(&mut self, name: &str, block: Block<T>) -> Result<(), PoolError> {
        self.pool_mut(name)?.release(block)
    }

    /// Drop a pool and all of its storage.
    ///
    /// Blocks still lent out stay valid for their holders but can no longer be
    /// released anywhere.
    pub fn remove_pool(&mut self, name: &str) -> Result<(), PoolError> {
        let pool = self
            .pools
            .remove(name)
            .ok_or_else(|| PoolError::UnknownPool(name.to_string()))?;
        if pool.in_use() > 0 {
            log::warn!(
                "Memory pool `{name}` removed with {} blocks still in use",
                pool.in_use()
            );
        }
        Ok(())
    }

    pub fn pool(&self, name: &str) -> Option<&BlockPool<T>> {
        self.pools.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.pools.contains_key(name)
    }

    /// Blocks lent out across all pools.
    pub fn total_in_use(&self) -> usize {
        self.pools.values().map(BlockPool::in_use).sum()
    }

    fn pool_mut(&mut self, name: &str) -> Result<&mut BlockPool<T>, PoolError> {
        self.pools
            .get_mut(name)
            .ok_or_else(|| PoolError::UnknownPool(name.to_string()))
    }
}

impl<T: Copy + Default> Default for MemPools<T> {
    fn default() -> Self {
        Self::new()
    }
}
