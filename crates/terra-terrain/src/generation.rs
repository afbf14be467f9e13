//! Background chunk generation over a fixed table of request slots.
//!
//! The main thread claims an idle slot, maps two pooled GPU buffers, and marks
//! the slot pending. Workers claim pending slots, tessellate straight into the
//! mapped memory, and mark them done. The main thread collects done slots one
//! at a time, unmaps the buffers, and wraps them in a [`ChunkObject`].
//!
//! Workers never see quadtree nodes or GPU objects, only requests and mapped
//! memory. Service order between pending slots is unspecified.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use glam::Vec3;
use terra_pool::PoolError;
use terra_render::{
    BufferId, ChunkObject, GpuBackend, GpuBufferPool, GpuError, MappedBuffer,
};

use crate::heightmap::Heightmap;
use crate::tessellate::{ChunkFootprint, TessellationScratch, tessellate_into};

/// A chunk to tessellate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ChunkRequest {
    pub x: u32,
    pub z: u32,
    pub level: u32,
    pub tessellation: u32,
}

impl ChunkRequest {
    pub fn footprint(&self, root_size: f64) -> ChunkFootprint {
        ChunkFootprint {
            x: self.x,
            z: self.z,
            level: self.level,
            tessellation: self.tessellation,
            root_size,
        }
    }
}

/// Identifies one accepted submission.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct RequestId {
    slot: u32,
    sequence: u64,
}

impl RequestId {
    pub fn slot(self) -> usize {
        self.slot as usize
    }
}

/// A finished chunk, unmapped and ready to draw.
#[derive(Debug)]
pub struct GeneratedChunk {
    pub id: RequestId,
    pub request: ChunkRequest,
    pub object: ChunkObject,
}

/// Why a submission was turned away. The caller keeps the request and may
/// retry on a later frame.
#[derive(Debug, thiserror::Error)]
pub enum SubmitError {
    #[error("no idle request slot")]
    NoFreeSlot,

    #[error("not enough free GPU buffers")]
    NoFreeBuffers,

    #[error("tessellation {tessellation} needs {needed} floats per buffer, pool buffers hold {available}")]
    TooLarge {
        tessellation: u32,
        needed: usize,
        available: usize,
    },

    #[error("failed to map chunk buffers: {0}")]
    Gpu(#[from] GpuError),
}

/// Errors from the worker pool outside of submission.
#[derive(Debug, thiserror::Error)]
pub enum GenerationError {
    #[error("failed to spawn generation worker: {0}")]
    Spawn(#[source] std::io::Error),

    #[error(transparent)]
    Gpu(#[from] GpuError),

    #[error(transparent)]
    Pool(#[from] PoolError),

    /// A finished chunk could not be committed; its buffers went back to
    /// the pool and the request can be submitted again.
    #[error("failed to commit chunk {request:?}: {source}")]
    Commit {
        request: ChunkRequest,
        source: GpuError,
    },
}

/// Worker pool sizing.
#[derive(Clone, Debug)]
pub struct GenerationSettings {
    /// Worker threads. Zero picks one per core, minus two, at least one.
    pub worker_count: usize,
    /// Requests that can be in flight at once.
    pub request_slots: usize,
    /// Side length of the level-0 root square.
    pub root_size: f64,
    /// Longest a worker sleeps before rechecking for work or shutdown.
    pub idle_wait: Duration,
}

impl GenerationSettings {
    pub fn resolved_worker_count(&self) -> usize {
        if self.worker_count > 0 {
            self.worker_count
        } else {
            num_cpus::get().saturating_sub(2).max(1)
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum SlotState {
    Idle,
    Pending,
    Working,
    Done,
}

struct Slot {
    state: SlotState,
    sequence: u64,
    request: Option<ChunkRequest>,
    buffers: Option<(BufferId, BufferId)>,
    vertices: Option<MappedBuffer>,
    normals: Option<MappedBuffer>,
    vertex_count: usize,
}

impl Slot {
    fn idle() -> Self {
        Self {
            state: SlotState::Idle,
            sequence: 0,
            request: None,
            buffers: None,
            vertices: None,
            normals: None,
            vertex_count: 0,
        }
    }
}

struct Shared {
    slots: Mutex<Vec<Slot>>,
    work_ready: Condvar,
    running: AtomicBool,
}

impl Shared {
    // Slot state is consistent at every unlock, so a poisoned table is still usable.
    fn lock(&self) -> MutexGuard<'_, Vec<Slot>> {
        self.slots.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Tessellation worker threads plus the request slot table they share with
/// the main thread.
pub struct GenerationPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    root_size: f64,
    next_sequence: u64,
}

impl GenerationPool {
    /// Spawn the workers.
    pub fn new(
        settings: GenerationSettings,
        heightmap: Arc<dyn Heightmap>,
    ) -> Result<Self, GenerationError> {
        let shared = Arc::new(Shared {
            slots: Mutex::new((0..settings.request_slots).map(|_| Slot::idle()).collect()),
            work_ready: Condvar::new(),
            running: AtomicBool::new(true),
        });
        let mut pool = Self {
            shared,
            workers: Vec::new(),
            root_size: settings.root_size,
            next_sequence: 0,
        };

        let worker_count = settings.resolved_worker_count();
        for index in 0..worker_count {
            let shared = Arc::clone(&pool.shared);
            let heightmap = Arc::clone(&heightmap);
            let root_size = settings.root_size;
            let idle_wait = settings.idle_wait;
            let handle = std::thread::Builder::new()
                .name(format!("terrain-gen-{index}"))
                .spawn(move || worker_loop(&shared, heightmap.as_ref(), root_size, idle_wait))
                .map_err(GenerationError::Spawn)?;
            pool.workers.push(handle);
        }

        log::info!(
            "Generation pool: {worker_count} workers, {} request slots",
            settings.request_slots
        );
        Ok(pool)
    }

    /// Queue a request without blocking.
    ///
    /// Takes two buffers from `buffers` and maps them. Any partial acquisition
    /// is rolled back before an error is returned.
    pub fn submit<B: GpuBackend + ?Sized>(
        &mut self,
        request: ChunkRequest,
        backend: &mut B,
        buffers: &mut GpuBufferPool,
    ) -> Result<RequestId, SubmitError> {
        let needed = request.footprint(self.root_size).float_count();
        if needed > buffers.buffer_len() {
            return Err(SubmitError::TooLarge {
                tessellation: request.tessellation,
                needed,
                available: buffers.buffer_len(),
            });
        }

        // Only this thread moves slots out of Idle, so the index stays valid
        // while the lock is released for mapping.
        let index = self
            .shared
            .lock()
            .iter()
            .position(|slot| slot.state == SlotState::Idle)
            .ok_or(SubmitError::NoFreeSlot)?;

        let vertex_id = buffers
            .acquire()
            .map_err(|_| SubmitError::NoFreeBuffers)?;
        let normal_id = match buffers.acquire() {
            Ok(id) => id,
            Err(_) => {
                if let Err(e) = buffers.release(vertex_id) {
                    log::warn!("Failed to roll back buffer {vertex_id:?}: {e}");
                }
                return Err(SubmitError::NoFreeBuffers);
            }
        };

        let mapped = backend.map_write(vertex_id).and_then(|vertices| {
            match backend.map_write(normal_id) {
                Ok(normals) => Ok((vertices, normals)),
                Err(e) => {
                    if let Err(unmap) = backend.unmap(vertices) {
                        log::warn!("Failed to unmap {vertex_id:?} during rollback: {unmap}");
                    }
                    Err(e)
                }
            }
        });
        let (vertices, normals) = match mapped {
            Ok(pair) => pair,
            Err(e) => {
                release_pair(buffers, vertex_id, normal_id);
                return Err(SubmitError::Gpu(e));
            }
        };

        self.next_sequence += 1;
        let sequence = self.next_sequence;
        {
            let mut slots = self.shared.lock();
            let slot = &mut slots[index];
            slot.state = SlotState::Pending;
            slot.sequence = sequence;
            slot.request = Some(request);
            slot.buffers = Some((vertex_id, normal_id));
            slot.vertices = Some(vertices);
            slot.normals = Some(normals);
            slot.vertex_count = 0;
        }
        self.shared.work_ready.notify_one();

        Ok(RequestId {
            slot: index as u32,
            sequence,
        })
    }

    /// Collect at most one finished request.
    ///
    /// The buffers stay checked out of `buffers`; they go back when the
    /// returned [`ChunkObject`] is destroyed. If the commit fails they are
    /// released and the request comes back in [`GenerationError::Commit`].
    pub fn poll<B: GpuBackend + ?Sized>(
        &mut self,
        backend: &mut B,
        buffers: &mut GpuBufferPool,
    ) -> Result<Option<GeneratedChunk>, GenerationError> {
        let taken = {
            let mut slots = self.shared.lock();
            let Some(index) = slots.iter().position(|s| s.state == SlotState::Done) else {
                return Ok(None);
            };
            let slot = &mut slots[index];
            slot.state = SlotState::Idle;
            (
                index,
                slot.sequence,
                slot.request.take(),
                slot.buffers.take(),
                slot.vertices.take(),
                slot.normals.take(),
                slot.vertex_count,
            )
        };
        let (index, sequence, request, ids, vertices, normals, vertex_count) = taken;
        let (Some(request), Some((vertex_id, normal_id)), Some(vertices), Some(normals)) =
            (request, ids, vertices, normals)
        else {
            unreachable!("done slot {index} is missing its payload");
        };

        let unmapped = backend.unmap(vertices);
        let unmapped = unmapped.and(backend.unmap(normals));
        if let Err(source) = unmapped {
            release_pair(buffers, vertex_id, normal_id);
            return Err(GenerationError::Commit { request, source });
        }

        let (ox, oz) = request.footprint(self.root_size).origin();
        let object = ChunkObject::new(
            vertex_id,
            normal_id,
            vertex_count as u32,
            Vec3::new(ox as f32, 0.0, oz as f32),
        );
        Ok(Some(GeneratedChunk {
            id: RequestId {
                slot: index as u32,
                sequence,
            },
            request,
            object,
        }))
    }

    /// Requests accepted but not yet finished.
    pub fn pending_count(&self) -> usize {
        self.shared
            .lock()
            .iter()
            .filter(|s| matches!(s.state, SlotState::Pending | SlotState::Working))
            .count()
    }

    /// Requests finished but not yet collected.
    pub fn done_count(&self) -> usize {
        self.shared
            .lock()
            .iter()
            .filter(|s| s.state == SlotState::Done)
            .count()
    }

    pub fn idle_count(&self) -> usize {
        self.shared
            .lock()
            .iter()
            .filter(|s| s.state == SlotState::Idle)
            .count()
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    pub fn slot_capacity(&self) -> usize {
        self.shared.lock().len()
    }

    /// Stop the workers, then unmap and release the buffers of every request
    /// that was never collected.
    pub fn shutdown<B: GpuBackend + ?Sized>(
        mut self,
        backend: &mut B,
        buffers: &mut GpuBufferPool,
    ) -> Result<(), GenerationError> {
        self.stop_workers();

        let mut first_error = None;
        let mut slots = self.shared.lock();
        for slot in slots.iter_mut().filter(|s| s.state != SlotState::Idle) {
            for mapped in [slot.vertices.take(), slot.normals.take()].into_iter().flatten() {
                if let Err(e) = backend.unmap(mapped) {
                    log::warn!("Failed to unmap buffer at shutdown: {e}");
                }
            }
            if let Some((vertex_id, normal_id)) = slot.buffers.take() {
                for id in [vertex_id, normal_id] {
                    if let Err(e) = buffers.release(id) {
                        first_error.get_or_insert(e);
                    }
                }
            }
            *slot = Slot::idle();
        }
        drop(slots);

        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    fn stop_workers(&mut self) {
        if self.workers.is_empty() {
            return;
        }
        self.shared.running.store(false, Ordering::Release);
        self.shared.work_ready.notify_all();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                log::warn!("Generation worker panicked");
            }
        }
        log::info!("Generation workers stopped");
    }
}

impl Drop for GenerationPool {
    fn drop(&mut self) {
        self.stop_workers();
    }
}

fn release_pair(buffers: &mut GpuBufferPool, a: BufferId, b: BufferId) {
    for id in [a, b] {
        if let Err(e) = buffers.release(id) {
            log::warn!("Failed to roll back buffer {id:?}: {e}");
        }
    }
}

fn worker_loop(shared: &Shared, heightmap: &dyn Heightmap, root_size: f64, idle_wait: Duration) {
    let mut scratch = TessellationScratch::default();

    while shared.running.load(Ordering::Acquire) {
        let claimed = {
            let mut slots = shared.lock();
            let pending = slots.iter().position(|s| s.state == SlotState::Pending);
            match pending {
                Some(index) => {
                    let slot = &mut slots[index];
                    slot.state = SlotState::Working;
                    match (slot.request, slot.vertices.take(), slot.normals.take()) {
                        (Some(request), Some(vertices), Some(normals)) => {
                            Some((index, request, vertices, normals))
                        }
                        _ => unreachable!("pending slot {index} is missing its request"),
                    }
                }
                None => {
                    let (slots, _timeout) = shared
                        .work_ready
                        .wait_timeout(slots, idle_wait)
                        .unwrap_or_else(PoisonError::into_inner);
                    drop(slots);
                    None
                }
            }
        };
        let Some((index, request, mut vertices, mut normals)) = claimed else {
            continue;
        };

        let footprint = request.footprint(root_size);
        let vertex_count =
            tessellate_into(&footprint, heightmap, &mut vertices, &mut normals, &mut scratch);

        let mut slots = shared.lock();
        let slot = &mut slots[index];
        slot.vertices = Some(vertices);
        slot.normals = Some(normals);
        slot.vertex_count = vertex_count;
        slot.state = SlotState::Done;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;
    use terra_render::{HostBackend, chunk_buffer_len};

    fn settings(workers: usize, slots: usize) -> GenerationSettings {
        GenerationSettings {
            worker_count: workers,
            request_slots: slots,
            root_size: 1000.0,
            idle_wait: Duration::from_millis(2),
        }
    }

    fn flat(height: f64) -> Arc<dyn Heightmap> {
        Arc::new(move |_: f64, _: f64| height)
    }

    fn request(x: u32, z: u32, level: u32) -> ChunkRequest {
        ChunkRequest {
            x,
            z,
            level,
            tessellation: 2,
        }
    }

    fn wait_for_result(
        pool: &mut GenerationPool,
        backend: &mut HostBackend,
        buffers: &mut GpuBufferPool,
    ) -> GeneratedChunk {
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            if let Some(chunk) = pool.poll(backend, buffers).unwrap() {
                return chunk;
            }
            assert!(Instant::now() < deadline, "timed out waiting for a result");
            std::thread::sleep(Duration::from_millis(1));
        }
    }

    #[test]
    fn test_generates_and_unmaps() {
        let mut backend = HostBackend::new(8);
        let mut buffers =
            GpuBufferPool::create(&mut backend, "chunks", chunk_buffer_len(2), 4).unwrap();
        let mut pool = GenerationPool::new(settings(2, 4), flat(7.0)).unwrap();

        let id = pool.submit(request(1, 0, 1), &mut backend, &mut buffers).unwrap();
        assert_eq!(buffers.in_use(), 2);

        let chunk = wait_for_result(&mut pool, &mut backend, &mut buffers);
        assert_eq!(chunk.id, id);
        assert_eq!(chunk.request, request(1, 0, 1));
        assert_eq!(chunk.object.vertex_count(), 16 * 6);
        assert_eq!(chunk.object.world_position(), Vec3::new(500.0, 0.0, 0.0));
        assert_eq!(backend.mapped_count(), 0);

        let vertices = backend.read_floats(chunk.object.vertex_buffer()).unwrap();
        assert!(vertices[..16 * 18].chunks(3).all(|v| v[1] == 7.0));
        assert_eq!(buffers.in_use(), 2);

        chunk.object.destroy(&mut buffers).unwrap();
        assert_eq!(buffers.in_use(), 0);
        pool.shutdown(&mut backend, &mut buffers).unwrap();
    }

    #[test]
    fn test_poll_returns_one_result_per_call() {
        let mut backend = HostBackend::new(8);
        let mut buffers =
            GpuBufferPool::create(&mut backend, "chunks", chunk_buffer_len(2), 8).unwrap();
        let mut pool = GenerationPool::new(settings(2, 4), flat(0.0)).unwrap();
        for x in 0..3 {
            pool.submit(request(x, 0, 2), &mut backend, &mut buffers).unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(10);
        while pool.done_count() < 3 {
            assert!(Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(1));
        }
        let mut seen = Vec::new();
        for remaining in (0..3).rev() {
            let chunk = pool.poll(&mut backend, &mut buffers).unwrap().unwrap();
            assert_eq!(pool.done_count(), remaining);
            seen.push(chunk.request.x);
            chunk.object.destroy(&mut buffers).unwrap();
        }
        seen.sort_unstable();
        assert_eq!(seen, [0, 1, 2]);
        assert!(pool.poll(&mut backend, &mut buffers).unwrap().is_none());
        pool.shutdown(&mut backend, &mut buffers).unwrap();
    }

    #[test]
    fn test_rejects_when_slots_full() {
        let mut backend = HostBackend::new(8);
        let mut buffers =
            GpuBufferPool::create(&mut backend, "chunks", chunk_buffer_len(2), 8).unwrap();
        let mut pool = GenerationPool::new(settings(1, 1), flat(0.0)).unwrap();
        pool.submit(request(0, 0, 0), &mut backend, &mut buffers).unwrap();
        assert!(matches!(
            pool.submit(request(0, 0, 1), &mut backend, &mut buffers),
            Err(SubmitError::NoFreeSlot)
        ));
        assert_eq!(buffers.in_use(), 2);
        pool.shutdown(&mut backend, &mut buffers).unwrap();
        assert_eq!(buffers.in_use(), 0);
    }

    #[test]
    fn test_rejects_when_buffers_run_out() {
        let mut backend = HostBackend::new(8);
        let mut buffers =
            GpuBufferPool::create(&mut backend, "chunks", chunk_buffer_len(2), 3).unwrap();
        let mut pool = GenerationPool::new(settings(1, 4), flat(0.0)).unwrap();
        pool.submit(request(0, 0, 0), &mut backend, &mut buffers).unwrap();
        assert!(matches!(
            pool.submit(request(1, 0, 1), &mut backend, &mut buffers),
            Err(SubmitError::NoFreeBuffers)
        ));
        assert_eq!(buffers.in_use(), 2);
        pool.shutdown(&mut backend, &mut buffers).unwrap();
    }

    #[test]
    fn test_mapping_failure_rolls_back_buffers() {
        // One staging block: the second map fails.
        let mut backend = HostBackend::new(1);
        let mut buffers =
            GpuBufferPool::create(&mut backend, "chunks", chunk_buffer_len(2), 4).unwrap();
        let mut pool = GenerationPool::new(settings(1, 2), flat(0.0)).unwrap();
        assert!(matches!(
            pool.submit(request(0, 0, 0), &mut backend, &mut buffers),
            Err(SubmitError::Gpu(GpuError::Staging(_)))
        ));
        assert_eq!(buffers.in_use(), 0);
        assert_eq!(backend.mapped_count(), 0);
        assert_eq!(pool.idle_count(), 2);
        pool.shutdown(&mut backend, &mut buffers).unwrap();
    }

    #[test]
    fn test_rejects_oversized_tessellation() {
        let mut backend = HostBackend::new(4);
        let mut buffers =
            GpuBufferPool::create(&mut backend, "chunks", chunk_buffer_len(1), 4).unwrap();
        let mut pool = GenerationPool::new(settings(1, 2), flat(0.0)).unwrap();
        assert!(matches!(
            pool.submit(request(0, 0, 0), &mut backend, &mut buffers),
            Err(SubmitError::TooLarge { .. })
        ));
        pool.shutdown(&mut backend, &mut buffers).unwrap();
    }

    #[test]
    fn test_shutdown_releases_uncollected_requests() {
        let mut backend = HostBackend::new(16);
        let mut buffers =
            GpuBufferPool::create(&mut backend, "chunks", chunk_buffer_len(2), 16).unwrap();
        let mut pool = GenerationPool::new(settings(2, 8), flat(1.0)).unwrap();
        for x in 0..4 {
            pool.submit(request(x, 0, 2), &mut backend, &mut buffers).unwrap();
        }
        pool.shutdown(&mut backend, &mut buffers).unwrap();
        assert_eq!(buffers.in_use(), 0);
        assert_eq!(backend.mapped_count(), 0);
    }

    #[test]
    fn test_auto_worker_count_is_at_least_one() {
        assert!(settings(0, 1).resolved_worker_count() >= 1);
        assert_eq!(settings(3, 1).resolved_worker_count(), 3);
    }

    #[test]
    fn test_drop_joins_workers() {
        let pool = GenerationPool::new(settings(3, 2), flat(0.0)).unwrap();
        assert_eq!(pool.worker_count(), 3);
        drop(pool);
    }
}
