//! The streaming engine: one quadtree, one GPU buffer pool, one worker pool.

use std::sync::Arc;
use std::thread::{self, ThreadId};
use std::time::Duration;

use glam::Vec3;
use terra_config::{Config, ConfigError};
use terra_pool::PoolError;
use terra_render::{ChunkObject, GpuBackend, GpuBufferPool, GpuError, chunk_buffer_len};
use terra_terrain::{
    ChunkFootprint, ChunkRequest, GeneratedChunk, GenerationError, GenerationPool,
    GenerationSettings, Heightmap, SubmitError,
};

use crate::node::{Chunk, NodeId, NodeStatus, QuadNode, Side};
use crate::selector::LodPolicy;
use crate::stitching::{neighbor_delta, side_heights, stitch_side};
use crate::tree::{QuadTree, release_object};

/// Errors surfaced by [`TerrainEngine`].
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Gpu(#[from] GpuError),

    #[error(transparent)]
    Submit(#[from] SubmitError),

    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

/// What one call to [`TerrainEngine::update`] did.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct FrameReport {
    /// Results attached to their awaiting node.
    pub integrated: usize,
    /// Results whose node was gone or no longer awaiting.
    pub stale_discarded: usize,
    pub submitted: usize,
    /// Requests turned away for lack of slots or buffers, retried next frame.
    pub rejected: usize,
    pub subdivided: usize,
    pub merged: usize,
    pub demoted: usize,
    /// Partial buffer writes issued by seam stitching.
    pub seam_writes: usize,
}

impl FrameReport {
    /// True if the frame changed nothing in the tree.
    pub fn is_quiet(&self) -> bool {
        self.integrated == 0
            && self.stale_discarded == 0
            && self.submitted == 0
            && self.rejected == 0
            && self.subdivided == 0
            && self.merged == 0
            && self.demoted == 0
    }

    fn accumulate(&mut self, other: &FrameReport) {
        self.integrated += other.integrated;
        self.stale_discarded += other.stale_discarded;
        self.submitted += other.submitted;
        self.rejected += other.rejected;
        self.subdivided += other.subdivided;
        self.merged += other.merged;
        self.demoted += other.demoted;
        self.seam_writes += other.seam_writes;
    }
}

/// Cumulative counters and a snapshot of current occupancy.
#[derive(Clone, Copy, Debug, Default)]
pub struct EngineStats {
    pub frames: u64,
    pub totals: FrameReport,
    pub nodes: usize,
    pub resident_chunks: usize,
    pub visible_chunks: usize,
    pub pending_requests: usize,
    pub done_requests: usize,
    pub buffers_in_use: usize,
    pub buffers_free: usize,
}

/// Streams terrain chunks around a viewpoint.
///
/// All methods must be called from the thread that created the engine. The
/// generation workers only ever see requests and mapped memory.
pub struct TerrainEngine<B: GpuBackend> {
    backend: B,
    buffers: GpuBufferPool,
    tree: QuadTree,
    generation: GenerationPool,
    heightmap: Arc<dyn Heightmap>,
    policy: LodPolicy,
    tessellation: u32,
    collect_budget: usize,
    viewpoint: Vec3,
    seams_dirty: bool,
    owner: ThreadId,
    frames: u64,
    totals: FrameReport,
    seam_scratch: Vec<f32>,
}

impl<B: GpuBackend> TerrainEngine<B> {
    /// Validate `config`, allocate every pool, and start the workers.
    pub fn new(
        config: &Config,
        mut backend: B,
        heightmap: Arc<dyn Heightmap>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let terrain = &config.terrain;

        let tree = QuadTree::new(config.pools.node_capacity)?;
        let mut buffers = GpuBufferPool::create(
            &mut backend,
            "chunks",
            chunk_buffer_len(terrain.tessellation),
            config.pools.gpu_buffer_capacity,
        )?;
        let settings = GenerationSettings {
            worker_count: config.generation.worker_count,
            request_slots: config.generation.request_slots,
            root_size: terrain.root_size,
            idle_wait: Duration::from_millis(config.generation.idle_wait_ms),
        };
        let generation = match GenerationPool::new(settings, Arc::clone(&heightmap)) {
            Ok(generation) => generation,
            Err(e) => {
                buffers.destroy(&mut backend);
                return Err(e.into());
            }
        };

        log::info!(
            "Terrain engine: root {} units, {} levels, tessellation {}, {} node slots",
            terrain.root_size,
            terrain.max_level,
            terrain.tessellation,
            config.pools.node_capacity
        );

        Ok(Self {
            backend,
            buffers,
            tree,
            generation,
            heightmap,
            policy: LodPolicy::new(terrain.root_size, terrain.min_distance, terrain.max_level),
            tessellation: terrain.tessellation,
            collect_budget: config.generation.collect_budget,
            viewpoint: Vec3::ZERO,
            seams_dirty: false,
            owner: thread::current().id(),
            frames: 0,
            totals: FrameReport::default(),
            seam_scratch: Vec::new(),
        })
    }

    pub fn set_viewpoint(&mut self, viewpoint: Vec3) {
        self.viewpoint = viewpoint;
    }

    pub fn viewpoint(&self) -> Vec3 {
        self.viewpoint
    }

    pub fn policy(&self) -> &LodPolicy {
        &self.policy
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn tree(&self) -> &QuadTree {
        &self.tree
    }

    pub fn root(&self) -> NodeId {
        self.tree.root()
    }

    pub fn node(&self, id: NodeId) -> Option<&QuadNode> {
        self.tree.node(id)
    }

    pub fn find_node(&self, x: u32, z: u32, level: u32) -> Option<NodeId> {
        self.tree.find(x, z, level)
    }

    /// Every resident chunk, drawn or not.
    pub fn chunks(&self) -> impl Iterator<Item = (NodeId, &Chunk)> {
        self.tree
            .iter()
            .filter_map(|(id, node)| node.chunk().map(|chunk| (id, chunk)))
    }

    /// The chunks a renderer should draw this frame.
    pub fn visible_chunks(&self) -> impl Iterator<Item = &ChunkObject> {
        self.chunks()
            .map(|(_, chunk)| chunk.object())
            .filter(|object| object.is_visible())
    }

    pub fn stats(&self) -> EngineStats {
        let resident_chunks = self.chunks().count();
        EngineStats {
            frames: self.frames,
            totals: self.totals,
            nodes: self.tree.len(),
            resident_chunks,
            visible_chunks: self.visible_chunks().count(),
            pending_requests: self.generation.pending_count(),
            done_requests: self.generation.done_count(),
            buffers_in_use: self.buffers.in_use(),
            buffers_free: self.buffers.free_count(),
        }
    }

    /// Run one frame: collect finished chunks, refine the tree around the
    /// viewpoint, and restitch seams if anything was shown or hidden.
    ///
    /// # Panics
    ///
    /// Panics if called from a thread other than the one that created the
    /// engine.
    pub fn update(&mut self) -> Result<FrameReport, EngineError> {
        assert!(
            thread::current().id() == self.owner,
            "TerrainEngine::update called off its owning thread"
        );
        let mut report = FrameReport::default();

        for _ in 0..self.collect_budget {
            match self.generation.poll(&mut self.backend, &mut self.buffers) {
                Ok(Some(generated)) => self.integrate(generated, &mut report),
                Ok(None) => break,
                Err(e) => {
                    if let GenerationError::Commit { request, .. } = &e {
                        self.abandon(request);
                    }
                    return Err(e.into());
                }
            }
        }

        let root = self.tree.root();
        self.poll_node(root, 0, 0, 0, &mut report)?;

        if self.seams_dirty {
            report.seam_writes = self.reconcile_seams()?;
            self.seams_dirty = false;
        }

        self.frames += 1;
        self.totals.accumulate(&report);
        Ok(report)
    }

    fn poll_node(
        &mut self,
        id: NodeId,
        x: u32,
        z: u32,
        level: u32,
        report: &mut FrameReport,
    ) -> Result<(), EngineError> {
        let target = self.policy.target_level(self.viewpoint, x, z, level);

        if level < target {
            let children = match self.tree[id].children() {
                Some(children) => children,
                None => match self.tree.subdivide(id) {
                    Ok(children) => {
                        report.subdivided += 1;
                        children
                    }
                    Err(e) => {
                        // Draw at this level until the arena has room again.
                        log::debug!("Deferring subdivision of ({x}, {z}, {level}): {e}");
                        if self.tree[id].is_empty() {
                            self.submit(id, x, z, level, report)?;
                        }
                        return Ok(());
                    }
                },
            };

            let node = &self.tree[id];
            if (node.is_resident() || node.is_awaiting()) && self.tree.children_covered(id) {
                self.tree.demote(id, &mut self.buffers);
                self.tree.set_boundary_visibility(id, true);
                self.seams_dirty = true;
                report.demoted += 1;
            }

            for (i, child) in children.into_iter().enumerate() {
                let (cx, cz) = (i as u32 % 2, i as u32 / 2);
                self.poll_node(child, x * 2 + cx, z * 2 + cz, level + 1, report)?;
            }
            return Ok(());
        }

        // A child can sit past its own target when it lies farther out than
        // its parent's centre; it is drawn where it is.
        let node = &self.tree[id];
        if !node.is_leaf() && node.is_resident() {
            self.tree.merge(id, &mut self.buffers);
            self.seams_dirty = true;
            report.merged += 1;
        } else if node.is_empty() {
            self.submit(id, x, z, level, report)?;
        }
        Ok(())
    }

    fn submit(
        &mut self,
        id: NodeId,
        x: u32,
        z: u32,
        level: u32,
        report: &mut FrameReport,
    ) -> Result<(), EngineError> {
        let request = ChunkRequest {
            x,
            z,
            level,
            tessellation: self.tessellation,
        };
        match self
            .generation
            .submit(request, &mut self.backend, &mut self.buffers)
        {
            Ok(_) => {
                self.tree.node_mut(id).status = NodeStatus::Awaiting;
                report.submitted += 1;
            }
            Err(
                e @ (SubmitError::NoFreeSlot
                | SubmitError::NoFreeBuffers
                | SubmitError::Gpu(GpuError::Staging(_))),
            ) => {
                log::debug!("Request for ({x}, {z}, {level}) rejected: {e}");
                report.rejected += 1;
            }
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    fn integrate(&mut self, generated: GeneratedChunk, report: &mut FrameReport) {
        let GeneratedChunk {
            request,
            mut object,
            ..
        } = generated;

        let target = self
            .tree
            .find(request.x, request.z, request.level)
            .filter(|&id| self.tree[id].is_awaiting());
        let Some(id) = target else {
            log::debug!(
                "Discarding stale chunk ({}, {}, {})",
                request.x,
                request.z,
                request.level
            );
            release_object(object, &mut self.buffers);
            report.stale_discarded += 1;
            return;
        };

        object.set_visible(!self.tree.has_resident_ancestor(id));
        self.tree.node_mut(id).status = NodeStatus::Resident(Chunk::new(object));
        if !self.tree[id].is_leaf() {
            self.tree.set_boundary_visibility(id, false);
        }
        self.tree.update_coverage(id);
        self.seams_dirty = true;
        report.integrated += 1;
    }

    /// Put the node waiting on `request` back to Empty so it is requested
    /// again.
    fn abandon(&mut self, request: &ChunkRequest) {
        let waiting = self
            .tree
            .find(request.x, request.z, request.level)
            .filter(|&id| self.tree[id].is_awaiting());
        if let Some(id) = waiting {
            self.tree.node_mut(id).status = NodeStatus::Empty;
        }
    }

    /// Restitch every side of every visible chunk whose drawn neighbour
    /// changed level.
    fn reconcile_seams(&mut self) -> Result<usize, EngineError> {
        let mut stale = Vec::new();
        self.tree.visit(|v| {
            let Some(chunk) = v.node.chunk().filter(|c| c.object().is_visible()) else {
                return;
            };
            for side in Side::ALL {
                let delta = neighbor_delta(&self.tree, v.id, v.level, side);
                if chunk.seam(side) != delta {
                    stale.push((v.id, v.x, v.z, v.level, side, delta));
                }
            }
        });

        let mut writes = 0;
        for (id, x, z, level, side, delta) in stale {
            let footprint = ChunkFootprint {
                x,
                z,
                level,
                tessellation: self.tessellation,
                root_size: self.policy.root_size,
            };
            side_heights(
                &footprint,
                side,
                delta,
                self.heightmap.as_ref(),
                &mut self.seam_scratch,
            );
            let Some(chunk) = self.tree.node_mut(id).chunk_mut() else {
                continue;
            };
            let buffer = chunk.object.vertex_buffer();
            chunk.seams[side.index()] = delta;
            writes += stitch_side(
                &mut self.backend,
                buffer,
                &footprint,
                side,
                &self.seam_scratch,
            )?;
        }
        Ok(writes)
    }

    /// Stop the workers, destroy every chunk and GPU buffer, and hand the
    /// backend back.
    pub fn shutdown(self) -> Result<B, EngineError> {
        let Self {
            mut backend,
            mut buffers,
            mut tree,
            generation,
            ..
        } = self;

        let stopped = generation.shutdown(&mut backend, &mut buffers);
        tree.clear(&mut buffers);
        buffers.destroy(&mut backend);
        stopped?;
        log::info!("Terrain engine shut down");
        Ok(backend)
    }
}
