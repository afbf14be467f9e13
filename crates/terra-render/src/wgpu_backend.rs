//! wgpu implementation of the buffer seam.

use rustc_hash::FxHashMap;

use crate::backend::{BufferId, GpuBackend, GpuError, MappedBuffer, check_bounds};
use crate::chunk_object::ChunkObject;
use crate::staging::Staging;

const FLOAT_SIZE: u64 = std::mem::size_of::<f32>() as u64;

const POSITION_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![0 => Float32x3];
const NORMAL_ATTRIBUTES: [wgpu::VertexAttribute; 1] = wgpu::vertex_attr_array![1 => Float32x3];

struct WgpuBuffer {
    buffer: wgpu::Buffer,
    len: usize,
    mapped: bool,
}

/// A [`GpuBackend`] that owns a wgpu device and queue.
///
/// Mapping lends out host staging memory; unmapping uploads it with
/// [`wgpu::Queue::write_buffer`], so worker threads never touch wgpu objects.
pub struct WgpuBackend {
    device: wgpu::Device,
    queue: wgpu::Queue,
    buffers: FxHashMap<BufferId, WgpuBuffer>,
    next_id: u32,
    staging: Staging,
}

impl WgpuBackend {
    /// Wrap an existing device and queue.
    pub fn new(device: wgpu::Device, queue: wgpu::Queue, staging_capacity: usize) -> Self {
        Self {
            device,
            queue,
            buffers: FxHashMap::default(),
            next_id: 1,
            staging: Staging::new(staging_capacity),
        }
    }

    /// Request a device without a surface, for offscreen use.
    pub async fn request_headless(staging_capacity: usize) -> Result<Self, GpuError> {
        let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
            backends: wgpu::Backends::all(),
            ..Default::default()
        });
        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                compatible_surface: None,
                force_fallback_adapter: false,
            })
            .await
            .map_err(|_| GpuError::NoAdapter)?;
        log::info!("Using GPU adapter: {}", adapter.get_info().name);
        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("terrain_device"),
                ..Default::default()
            })
            .await?;
        Ok(Self::new(device, queue, staging_capacity))
    }

    /// Blocking wrapper around [`WgpuBackend::request_headless`].
    pub fn request_headless_blocking(staging_capacity: usize) -> Result<Self, GpuError> {
        pollster::block_on(Self::request_headless(staging_capacity))
    }

    pub fn device(&self) -> &wgpu::Device {
        &self.device
    }

    pub fn queue(&self) -> &wgpu::Queue {
        &self.queue
    }

    /// The wgpu buffer behind a handle.
    pub fn buffer(&self, id: BufferId) -> Option<&wgpu::Buffer> {
        self.buffers.get(&id).map(|b| &b.buffer)
    }

    /// Vertex layouts for a chunk: positions in slot 0, normals in slot 1.
    pub fn chunk_vertex_layouts() -> [wgpu::VertexBufferLayout<'static>; 2] {
        let stride = 3 * FLOAT_SIZE;
        [
            wgpu::VertexBufferLayout {
                array_stride: stride,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &POSITION_ATTRIBUTES,
            },
            wgpu::VertexBufferLayout {
                array_stride: stride,
                step_mode: wgpu::VertexStepMode::Vertex,
                attributes: &NORMAL_ATTRIBUTES,
            },
        ]
    }

    /// Bind a chunk's position and normal buffers to the render pass.
    ///
    /// Returns `false` if either buffer is unknown to this backend.
    pub fn bind_chunk<'a>(&'a self, chunk: &ChunkObject, render_pass: &mut wgpu::RenderPass<'a>) -> bool {
        let (Some(vertices), Some(normals)) = (
            self.buffer(chunk.vertex_buffer()),
            self.buffer(chunk.normal_buffer()),
        ) else {
            return false;
        };
        let used = chunk.vertex_count() as u64 * 3 * FLOAT_SIZE;
        render_pass.set_vertex_buffer(0, vertices.slice(..used));
        render_pass.set_vertex_buffer(1, normals.slice(..used));
        true
    }

    /// Draw a bound chunk as a triangle list.
    pub fn draw_chunk(&self, chunk: &ChunkObject, render_pass: &mut wgpu::RenderPass) {
        render_pass.draw(0..chunk.vertex_count(), 0..1);
    }

    fn entry_mut(&mut self, id: BufferId) -> Result<&mut WgpuBuffer, GpuError> {
        self.buffers.get_mut(&id).ok_or(GpuError::UnknownBuffer(id))
    }
}

impl GpuBackend for WgpuBackend {
    fn create_buffer(&mut self, label: &str, len: usize) -> Result<BufferId, GpuError> {
        let buffer = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: len as u64 * FLOAT_SIZE,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let id = BufferId(self.next_id);
        self.next_id += 1;
        self.buffers.insert(
            id,
            WgpuBuffer {
                buffer,
                len,
                mapped: false,
            },
        );
        Ok(id)
    }

    fn destroy_buffer(&mut self, id: BufferId) {
        if let Some(entry) = self.buffers.remove(&id) {
            entry.buffer.destroy();
        }
    }

    fn buffer_len(&self, id: BufferId) -> Option<usize> {
        self.buffers.get(&id).map(|b| b.len)
    }

    fn map_write(&mut self, id: BufferId) -> Result<MappedBuffer, GpuError> {
        let entry = self.buffers.get(&id).ok_or(GpuError::UnknownBuffer(id))?;
        if entry.mapped {
            return Err(GpuError::AlreadyMapped(id));
        }
        let len = entry.len;
        let block = self.staging.acquire(len)?;
        self.entry_mut(id)?.mapped = true;
        Ok(MappedBuffer::new(id, block, len))
    }

    fn unmap(&mut self, mapped: MappedBuffer) -> Result<(), GpuError> {
        let id = mapped.id();
        let entry = self.buffers.get_mut(&id).ok_or(GpuError::UnknownBuffer(id))?;
        if !entry.mapped {
            return Err(GpuError::NotMapped(id));
        }
        self.queue
            .write_buffer(&entry.buffer, 0, bytemuck::cast_slice(&mapped[..]));
        entry.mapped = false;
        let len = entry.len;
        self.staging.release(len, mapped.block)?;
        Ok(())
    }

    fn write_floats(&mut self, id: BufferId, offset: usize, data: &[f32]) -> Result<(), GpuError> {
        let entry = self.buffers.get(&id).ok_or(GpuError::UnknownBuffer(id))?;
        if entry.mapped {
            return Err(GpuError::Mapped(id));
        }
        check_bounds(id, offset, data.len(), entry.len)?;
        if !data.is_empty() {
            self.queue.write_buffer(
                &entry.buffer,
                offset as u64 * FLOAT_SIZE,
                bytemuck::cast_slice(data),
            );
        }
        Ok(())
    }

    fn read_floats(&self, _id: BufferId) -> Result<Vec<f32>, GpuError> {
        Err(GpuError::Unsupported("buffer readback"))
    }
}
