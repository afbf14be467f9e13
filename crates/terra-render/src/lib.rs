//! GPU buffer plumbing for terrain chunks: the backend seam, a fixed-capacity
//! buffer pool, and the render-object adapter handed to external renderers.

pub mod backend;
pub mod chunk_object;
pub mod gpu_buffer_pool;
pub mod host;
pub mod wgpu_backend;

mod staging;

pub use backend::{BufferId, GpuBackend, GpuError, MappedBuffer};
pub use chunk_object::ChunkObject;
pub use gpu_buffer_pool::{GpuBufferPool, chunk_buffer_len};
pub use host::HostBackend;
pub use wgpu_backend::WgpuBackend;
