//! Fixed-capacity pool of uniformly sized GPU buffers.
//!
//! Every chunk mesh fits in the same upper bound, so the pool allocates all of
//! its buffers once at startup and hands them out by handle. Acquisition never
//! touches the driver, and nothing is freed until the pool is destroyed.

use rustc_hash::FxHashMap;
use terra_pool::PoolError;

use crate::backend::{BufferId, GpuBackend, GpuError};

/// Floats needed for one per-vertex attribute of a chunk tessellated at
/// `tessellation`: `4^t` quads, six vertices each, three components.
pub fn chunk_buffer_len(tessellation: u32) -> usize {
    4usize.pow(tessellation) * 6 * 3
}

/// A named set of GPU buffers with busy flags.
pub struct GpuBufferPool {
    name: String,
    buffer_len: usize,
    buffers: Vec<BufferId>,
    busy: Vec<bool>,
    slot_of: FxHashMap<BufferId, usize>,
    in_use: usize,
    high_water: usize,
}

impl GpuBufferPool {
    /// Allocate `capacity` buffers of `buffer_len` floats each.
    ///
    /// On failure the buffers created so far are destroyed again.
    pub fn create<B: GpuBackend + ?Sized>(
        backend: &mut B,
        name: &str,
        buffer_len: usize,
        capacity: usize,
    ) -> Result<Self, GpuError> {
        let mut buffers = Vec::with_capacity(capacity);
        for i in 0..capacity {
            match backend.create_buffer(&format!("{name}_{i}"), buffer_len) {
                Ok(id) => buffers.push(id),
                Err(e) => {
                    for id in buffers {
                        backend.destroy_buffer(id);
                    }
                    return Err(e);
                }
            }
        }
        let slot_of = buffers.iter().enumerate().map(|(i, &id)| (id, i)).collect();
        log::info!(
            "GPU buffer pool `{name}`: {capacity} buffers of {} bytes",
            buffer_len * std::mem::size_of::<f32>()
        );
        Ok(Self {
            name: name.to_string(),
            buffer_len,
            busy: vec![false; buffers.len()],
            buffers,
            slot_of,
            in_use: 0,
            high_water: 0,
        })
    }

    /// Hand out the first free buffer.
    pub fn acquire(&mut self) -> Result<BufferId, PoolError> {
        let Some(slot) = self.busy.iter().position(|&busy| !busy) else {
            return Err(PoolError::Exhausted {
                pool: self.name.clone(),
                capacity: self.buffers.len(),
            });
        };
        self.busy[slot] = true;
        self.in_use += 1;
        self.high_water = self.high_water.max(self.in_use);
        Ok(self.buffers[slot])
    }

    /// Return a buffer handed out by [`GpuBufferPool::acquire`].
    pub fn release(&mut self, id: BufferId) -> Result<(), PoolError> {
        let slot = *self
            .slot_of
            .get(&id)
            .ok_or_else(|| PoolError::ForeignItem(self.name.clone()))?;
        if !self.busy[slot] {
            return Err(PoolError::NotBusy {
                pool: self.name.clone(),
                slot,
            });
        }
        self.busy[slot] = false;
        self.in_use -= 1;
        Ok(())
    }

    /// Returns `true` if `id` is currently handed out.
    pub fn is_busy(&self, id: BufferId) -> bool {
        self.slot_of.get(&id).is_some_and(|&slot| self.busy[slot])
    }

    /// Delete every buffer of the pool.
    pub fn destroy<B: GpuBackend + ?Sized>(self, backend: &mut B) {
        if self.in_use > 0 {
            log::warn!(
                "GPU buffer pool `{}` destroyed with {} buffers still in use",
                self.name,
                self.in_use
            );
        }
        for id in self.buffers {
            backend.destroy_buffer(id);
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Length of every buffer in floats.
    pub fn buffer_len(&self) -> usize {
        self.buffer_len
    }

    pub fn capacity(&self) -> usize {
        self.buffers.len()
    }

    pub fn in_use(&self) -> usize {
        self.in_use
    }

    pub fn free_count(&self) -> usize {
        self.buffers.len() - self.in_use
    }

    /// Largest number of buffers handed out at the same time.
    pub fn high_water(&self) -> usize {
        self.high_water
    }
}
