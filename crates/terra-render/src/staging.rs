//! Host staging memory shared by the backends.

use terra_pool::{Block, MemPools, PoolError};

/// One block pool per distinct buffer length, created on first use.
pub(crate) struct Staging {
    pools: MemPools<f32>,
    capacity: usize,
}

impl Staging {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            pools: MemPools::new(),
            capacity,
        }
    }

    fn pool_name(len: usize) -> String {
        format!("staging-{len}")
    }

    pub(crate) fn acquire(&mut self, len: usize) -> Result<Block<f32>, PoolError> {
        let name = Self::pool_name(len);
        if !self.pools.contains(&name) {
            self.pools.create_pool(&name, len, self.capacity)?;
        }
        self.pools.acquire(&name)
    }

    pub(crate) fn release(&mut self, len: usize, block: Block<f32>) -> Result<(), PoolError> {
        self.pools.release(&Self::pool_name(len), block)
    }

    pub(crate) fn in_use(&self) -> usize {
        self.pools.total_in_use()
    }
}
