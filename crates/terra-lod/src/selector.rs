//! Distance-based target level for quadtree nodes.

use glam::Vec3;

/// Maps a node's distance from the viewpoint to the level it should be
/// drawn at.
///
/// A node at `(x, z, level)` covers a square of side `root_size / 2^level`.
/// Its target is the largest `L <= max_level` whose threshold
/// `min_distance / 2^L` is strictly greater than the distance from the
/// viewpoint to the square's centre at height zero. Ties round towards the
/// coarser level.
#[derive(Clone, Debug, PartialEq)]
pub struct LodPolicy {
    pub root_size: f64,
    pub min_distance: f64,
    pub max_level: u32,
}

impl LodPolicy {
    pub fn new(root_size: f64, min_distance: f64, max_level: u32) -> Self {
        Self {
            root_size,
            min_distance,
            max_level,
        }
    }

    /// Side length of a node at `level`.
    pub fn node_size(&self, level: u32) -> f64 {
        self.root_size / f64::from(1u32 << level)
    }

    /// Centre of a node's footprint at height zero.
    pub fn node_center(&self, x: u32, z: u32, level: u32) -> Vec3 {
        let size = self.node_size(level);
        Vec3::new(
            ((f64::from(x) + 0.5) * size) as f32,
            0.0,
            ((f64::from(z) + 0.5) * size) as f32,
        )
    }

    /// Level for something `distance` away from the viewpoint.
    pub fn level_for_distance(&self, distance: f64) -> u32 {
        debug_assert!(distance >= 0.0, "distance must be non-negative");
        let mut level = 0;
        let mut threshold = self.min_distance / 2.0;
        while level < self.max_level && distance < threshold {
            level += 1;
            threshold /= 2.0;
        }
        level
    }

    /// Target level of the node at `(x, z, level)`.
    pub fn target_level(&self, viewpoint: Vec3, x: u32, z: u32, level: u32) -> u32 {
        let center = self.node_center(x, z, level);
        self.level_for_distance(f64::from(center.distance(viewpoint)))
    }
}
