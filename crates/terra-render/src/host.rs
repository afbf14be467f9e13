//! In-memory backend for headless runs and tests.

use rustc_hash::FxHashMap;

use crate::backend::{BufferId, GpuBackend, GpuError, MappedBuffer, check_bounds};
use crate::staging::Staging;

struct HostBuffer {
    label: String,
    data: Vec<f32>,
    mapped: bool,
}

/// A [`GpuBackend`] whose buffers live in host memory.
///
/// Mapping and partial writes behave like the GPU path, including the
/// staging-memory limit, so the streaming pipeline can run without an adapter.
pub struct HostBackend {
    buffers: FxHashMap<BufferId, HostBuffer>,
    next_id: u32,
    staging: Staging,
    partial_writes: u64,
}

impl HostBackend {
    /// Create a backend that can keep `staging_capacity` buffers of each
    /// length mapped at the same time.
    pub fn new(staging_capacity: usize) -> Self {
        Self {
            buffers: FxHashMap::default(),
            next_id: 1,
            staging: Staging::new(staging_capacity),
            partial_writes: 0,
        }
    }

    /// Number of live buffers.
    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }

    /// Number of buffers currently mapped.
    pub fn mapped_count(&self) -> usize {
        self.staging.in_use()
    }

    /// Number of successful [`GpuBackend::write_floats`] calls so far.
    pub fn partial_writes(&self) -> u64 {
        self.partial_writes
    }

    pub fn label(&self, id: BufferId) -> Option<&str> {
        self.buffers.get(&id).map(|b| b.label.as_str())
    }

    fn buffer_mut(&mut self, id: BufferId) -> Result<&mut HostBuffer, GpuError> {
        self.buffers.get_mut(&id).ok_or(GpuError::UnknownBuffer(id))
    }
}

impl GpuBackend for HostBackend {
    fn create_buffer(&mut self, label: &str, len: usize) -> Result<BufferId, GpuError> {
        let id = BufferId(self.next_id);
        self.next_id += 1;
        self.buffers.insert(
            id,
            HostBuffer {
                label: label.to_string(),
                data: vec![0.0; len],
                mapped: false,
            },
        );
        Ok(id)
    }

    fn destroy_buffer(&mut self, id: BufferId) {
        self.buffers.remove(&id);
    }

    fn buffer_len(&self, id: BufferId) -> Option<usize> {
        self.buffers.get(&id).map(|b| b.data.len())
    }

    fn map_write(&mut self, id: BufferId) -> Result<MappedBuffer, GpuError> {
        let buffer = self.buffers.get(&id).ok_or(GpuError::UnknownBuffer(id))?;
        if buffer.mapped {
            return Err(GpuError::AlreadyMapped(id));
        }
        let len = buffer.data.len();
        let block = self.staging.acquire(len)?;
        self.buffer_mut(id)?.mapped = true;
        Ok(MappedBuffer::new(id, block, len))
    }

    fn unmap(&mut self, mapped: MappedBuffer) -> Result<(), GpuError> {
        let id = mapped.id();
        let buffer = self.buffer_mut(id)?;
        if !buffer.mapped {
            return Err(GpuError::NotMapped(id));
        }
        buffer.data.copy_from_slice(&mapped);
        buffer.mapped = false;
        let len = buffer.data.len();
        self.staging.release(len, mapped.block)?;
        Ok(())
    }

    fn write_floats(&mut self, id: BufferId, offset: usize, data: &[f32]) -> Result<(), GpuError> {
        let buffer = self.buffer_mut(id)?;
        if buffer.mapped {
            return Err(GpuError::Mapped(id));
        }
        check_bounds(id, offset, data.len(), buffer.data.len())?;
        buffer.data[offset..offset + data.len()].copy_from_slice(data);
        self.partial_writes += 1;
        Ok(())
    }

    fn read_floats(&self, id: BufferId) -> Result<Vec<f32>, GpuError> {
        self.buffers
            .get(&id)
            .map(|b| b.data.clone())
            .ok_or(GpuError::UnknownBuffer(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_map_write_unmap_commits_data() {
        let mut backend = HostBackend::new(4);
        let id = backend.create_buffer("chunk_vertices", 6).unwrap();
        let mut mapped = backend.map_write(id).unwrap();
        mapped.copy_from_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]);
        assert_eq!(backend.mapped_count(), 1);
        backend.unmap(mapped).unwrap();
        assert_eq!(backend.mapped_count(), 0);
        assert_eq!(
            backend.read_floats(id).unwrap(),
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]
        );
    }

    #[test]
    fn test_mapped_region_can_be_filled_on_another_thread() {
        let mut backend = HostBackend::new(1);
        let id = backend.create_buffer("chunk_normals", 3).unwrap();
        let mapped = backend.map_write(id).unwrap();
        let mapped = std::thread::spawn(move || {
            let mut mapped = mapped;
            mapped.fill(0.5);
            mapped
        })
        .join()
        .unwrap();
        backend.unmap(mapped).unwrap();
        assert_eq!(backend.read_floats(id).unwrap(), vec![0.5; 3]);
    }

    #[test]
    fn test_double_map_rejected() {
        let mut backend = HostBackend::new(4);
        let id = backend.create_buffer("b", 3).unwrap();
        let _mapped = backend.map_write(id).unwrap();
        assert!(matches!(backend.map_write(id), Err(GpuError::AlreadyMapped(_))));
    }

    #[test]
    fn test_staging_exhaustion() {
        let mut backend = HostBackend::new(1);
        let a = backend.create_buffer("a", 3).unwrap();
        let b = backend.create_buffer("b", 3).unwrap();
        let _mapped = backend.map_write(a).unwrap();
        assert!(matches!(backend.map_write(b), Err(GpuError::Staging(_))));
    }

    #[test]
    fn test_partial_write() {
        let mut backend = HostBackend::new(1);
        let id = backend.create_buffer("b", 6).unwrap();
        backend.write_floats(id, 4, &[7.0, 8.0]).unwrap();
        assert_eq!(
            backend.read_floats(id).unwrap(),
            vec![0.0, 0.0, 0.0, 0.0, 7.0, 8.0]
        );
        assert_eq!(backend.partial_writes(), 1);
        assert!(matches!(
            backend.write_floats(id, 5, &[1.0, 2.0]),
            Err(GpuError::OutOfBounds { .. })
        ));
    }

    #[test]
    fn test_partial_write_rejected_while_mapped() {
        let mut backend = HostBackend::new(1);
        let id = backend.create_buffer("b", 3).unwrap();
        let mapped = backend.map_write(id).unwrap();
        assert!(matches!(
            backend.write_floats(id, 0, &[1.0]),
            Err(GpuError::Mapped(_))
        ));
        backend.unmap(mapped).unwrap();
        backend.write_floats(id, 0, &[1.0]).unwrap();
    }

    #[test]
    fn test_destroyed_buffer_is_unknown() {
        let mut backend = HostBackend::new(1);
        let id = backend.create_buffer("b", 3).unwrap();
        backend.destroy_buffer(id);
        assert_eq!(backend.buffer_count(), 0);
        assert!(matches!(
            backend.read_floats(id),
            Err(GpuError::UnknownBuffer(_))
        ));
    }
}
