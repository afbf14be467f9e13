//! Terrain surface generation: the heightmap oracle, the chunk tessellator,
//! and the worker pool that runs tessellation off the main thread.

mod generation;
mod heightmap;
mod tessellate;

pub use generation::{
    ChunkRequest, GeneratedChunk, GenerationError, GenerationPool, GenerationSettings, RequestId,
    SubmitError,
};
pub use heightmap::{Heightmap, HeightmapParams, HeightmapSampler};
pub use tessellate::{ChunkFootprint, TessellatedMesh, TessellationScratch, tessellate, tessellate_into};
