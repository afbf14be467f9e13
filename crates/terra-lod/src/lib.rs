//! Quadtree level-of-detail streaming over a square terrain domain.
//!
//! [`TerrainEngine`] owns the quadtree, the GPU buffer pool, and the
//! generation workers. Each frame it collects finished chunks, walks the tree
//! to subdivide, merge, and request chunks around the viewpoint, and stitches
//! seams between chunks of different levels.

mod engine;
mod node;
mod selector;
mod stitching;
mod tree;

pub use engine::{EngineError, EngineStats, FrameReport, TerrainEngine};
pub use node::{Chunk, NodeId, NodeShape, NodeStatus, QuadNode, Side};
pub use selector::LodPolicy;
pub use stitching::{side_heights, stitch_side};
pub use tree::{NodeVisit, QuadTree};
