//! Render-object adapter for a generated chunk.

use glam::Vec3;
use terra_pool::PoolError;

use crate::backend::BufferId;
use crate::gpu_buffer_pool::GpuBufferPool;

/// A drawable chunk: two pooled GPU buffers, a vertex count, a world-space
/// origin, and a visibility flag.
///
/// The streaming engine owns these and only toggles visibility; drawing is
/// left to the renderer.
#[derive(Debug)]
pub struct ChunkObject {
    vertex_buffer: BufferId,
    normal_buffer: BufferId,
    vertex_count: u32,
    world_position: Vec3,
    visible: bool,
}

impl ChunkObject {
    /// Wrap two filled buffers. The object starts visible.
    pub fn new(
        vertex_buffer: BufferId,
        normal_buffer: BufferId,
        vertex_count: u32,
        world_position: Vec3,
    ) -> Self {
        Self {
            vertex_buffer,
            normal_buffer,
            vertex_count,
            world_position,
            visible: true,
        }
    }

    pub fn vertex_buffer(&self) -> BufferId {
        self.vertex_buffer
    }

    pub fn normal_buffer(&self) -> BufferId {
        self.normal_buffer
    }

    pub fn vertex_count(&self) -> u32 {
        self.vertex_count
    }

    /// Translation from chunk-local to world coordinates.
    pub fn world_position(&self) -> Vec3 {
        self.world_position
    }

    pub fn is_visible(&self) -> bool {
        self.visible
    }

    pub fn set_visible(&mut self, visible: bool) {
        self.visible = visible;
    }

    /// Return both buffers to the pool.
    pub fn destroy(self, pool: &mut GpuBufferPool) -> Result<(), PoolError> {
        let vertices = pool.release(self.vertex_buffer);
        let normals = pool.release(self.normal_buffer);
        vertices.and(normals)
    }
}
