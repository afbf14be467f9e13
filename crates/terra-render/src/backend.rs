//! The graphics API seam.
//!
//! All methods are called from the thread that owns the graphics context. The
//! only thing that crosses to worker threads is a [`MappedBuffer`], which owns
//! its CPU-visible memory outright.

use std::ops::{Deref, DerefMut};

use terra_pool::{Block, PoolError};

/// Opaque handle to a buffer created by a [`GpuBackend`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BufferId(pub(crate) u32);

impl BufferId {
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// CPU-visible memory for a buffer that is mapped for writing.
///
/// Writes become visible to the GPU once the region is passed back to
/// [`GpuBackend::unmap`].
#[derive(Debug)]
pub struct MappedBuffer {
    id: BufferId,
    pub(crate) block: Block<f32>,
    len: usize,
}

impl MappedBuffer {
    pub(crate) fn new(id: BufferId, block: Block<f32>, len: usize) -> Self {
        Self { id, block, len }
    }

    /// The buffer this region belongs to.
    pub fn id(&self) -> BufferId {
        self.id
    }
}

impl Deref for MappedBuffer {
    type Target = [f32];

    fn deref(&self) -> &[f32] {
        &self.block[..self.len]
    }
}

impl DerefMut for MappedBuffer {
    fn deref_mut(&mut self) -> &mut [f32] {
        &mut self.block[..self.len]
    }
}

/// Errors reported by a [`GpuBackend`].
#[derive(Debug, thiserror::Error)]
pub enum GpuError {
    /// The handle does not name a live buffer.
    #[error("unknown buffer {0:?}")]
    UnknownBuffer(BufferId),

    /// The buffer is already mapped.
    #[error("buffer {0:?} is already mapped")]
    AlreadyMapped(BufferId),

    /// The buffer is mapped and cannot be written directly.
    #[error("buffer {0:?} is mapped")]
    Mapped(BufferId),

    /// The buffer was not mapped by this backend.
    #[error("buffer {0:?} is not mapped")]
    NotMapped(BufferId),

    /// A write falls outside the buffer.
    #[error("write of {len} floats at offset {offset} overflows buffer {id:?} of {capacity} floats")]
    OutOfBounds {
        id: BufferId,
        offset: usize,
        len: usize,
        capacity: usize,
    },

    /// No staging memory is left to map another buffer.
    #[error("staging memory: {0}")]
    Staging(#[from] PoolError),

    /// No compatible GPU adapter found.
    #[error("no compatible GPU adapter found")]
    NoAdapter,

    /// Failed to request GPU device.
    #[error("failed to request GPU device: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    /// The backend cannot perform the operation.
    #[error("operation not supported by this backend: {0}")]
    Unsupported(&'static str),
}

/// Buffer operations the terrain pipeline needs from a graphics API.
pub trait GpuBackend {
    /// Create a buffer holding `len` floats.
    fn create_buffer(&mut self, label: &str, len: usize) -> Result<BufferId, GpuError>;

    /// Delete a buffer. Unknown handles are ignored.
    fn destroy_buffer(&mut self, id: BufferId);

    /// Length of a live buffer in floats.
    fn buffer_len(&self, id: BufferId) -> Option<usize>;

    /// Map a buffer for writing and hand out its CPU-visible memory.
    fn map_write(&mut self, id: BufferId) -> Result<MappedBuffer, GpuError>;

    /// Commit a mapped region back into its buffer.
    fn unmap(&mut self, mapped: MappedBuffer) -> Result<(), GpuError>;

    /// Overwrite `data.len()` floats starting at float `offset`.
    fn write_floats(&mut self, id: BufferId, offset: usize, data: &[f32]) -> Result<(), GpuError>;

    /// Copy a buffer's contents back to the host.
    fn read_floats(&self, id: BufferId) -> Result<Vec<f32>, GpuError>;
}

pub(crate) fn check_bounds(
    id: BufferId,
    offset: usize,
    len: usize,
    capacity: usize,
) -> Result<(), GpuError> {
    if offset.checked_add(len).is_none_or(|end| end > capacity) {
        return Err(GpuError::OutOfBounds {
            id,
            offset,
            len,
            capacity,
        });
    }
    Ok(())
}
