//! Pool error types.

/// Errors reported by the pool allocators.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PoolError {
    /// Every slot of the pool is in use.
    #[error("pool `{pool}` is exhausted ({capacity} slots in use)")]
    Exhausted { pool: String, capacity: usize },

    /// No pool is registered under the given name.
    #[error("no pool named `{0}`")]
    UnknownPool(String),

    /// A pool with the given name is already registered.
    #[error("a pool named `{0}` already exists")]
    AlreadyExists(String),

    /// The released item was handed out by a different pool.
    #[error("item does not belong to pool `{0}`")]
    ForeignItem(String),

    /// The released slot is not currently handed out.
    #[error("slot {slot} of pool `{pool}` is not in use")]
    NotBusy { pool: String, slot: usize },
}
