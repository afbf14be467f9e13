//! Fixed-capacity pool allocators.
//!
//! Everything the terrain pipeline touches at steady state is preallocated:
//! quadtree nodes live in a [`SlotPool`], and CPU-visible staging memory for
//! mapped GPU buffers is lent out as [`Block`]s from named [`BlockPool`]s kept
//! in a [`MemPools`] registry.

mod block;
mod error;
mod registry;
mod slot;

pub use block::{Block, BlockPool};
pub use error::PoolError;
pub use registry::MemPools;
pub use slot::{SlotId, SlotPool};
