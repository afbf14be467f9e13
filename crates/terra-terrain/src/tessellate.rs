//! Heightfield tessellation of a square chunk footprint.
//!
//! A chunk tessellated at `t` is a grid of `2^t x 2^t` quads emitted as an
//! unindexed triangle list. Quad `(i, j)` starts at vertex `6 * (j * n + i)`
//! and emits its corners in the order NW, SW, SE, NW, SE, NE, where north is
//! `-z` and west is `-x`. Positions are chunk-local in x/z and absolute in y.

use glam::Vec3;

use crate::heightmap::Heightmap;

/// The square a chunk covers, addressed on the quadtree grid.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChunkFootprint {
    pub x: u32,
    pub z: u32,
    pub level: u32,
    pub tessellation: u32,
    /// Side length of the level-0 root square.
    pub root_size: f64,
}

impl ChunkFootprint {
    /// Quads along one side.
    pub fn quads_per_side(&self) -> u32 {
        1 << self.tessellation
    }

    /// Side length in world units.
    pub fn size(&self) -> f64 {
        self.root_size / f64::from(1u32 << self.level)
    }

    /// Distance between neighbouring grid vertices.
    pub fn vertex_spacing(&self) -> f64 {
        self.size() / f64::from(self.quads_per_side())
    }

    /// World-space corner with the smallest x and z.
    pub fn origin(&self) -> (f64, f64) {
        let size = self.size();
        (f64::from(self.x) * size, f64::from(self.z) * size)
    }

    /// Index of the chunk's first grid vertex on the global vertex lattice of
    /// its level.
    pub fn first_vertex(&self) -> (u64, u64) {
        let n = u64::from(self.quads_per_side());
        (u64::from(self.x) * n, u64::from(self.z) * n)
    }

    /// World coordinate of a global lattice index.
    ///
    /// Lattices of adjacent levels differ by exact powers of two, so shared
    /// vertices resolve to bit-identical coordinates from either side.
    pub fn lattice_coord(&self, index: u64) -> f64 {
        index as f64 * self.vertex_spacing()
    }

    pub fn vertex_count(&self) -> usize {
        let n = self.quads_per_side() as usize;
        n * n * 6
    }

    /// Floats needed per attribute buffer.
    pub fn float_count(&self) -> usize {
        self.vertex_count() * 3
    }
}

/// Reusable working memory for [`tessellate_into`].
#[derive(Default)]
pub struct TessellationScratch {
    heights: Vec<f32>,
    faces: Vec<Vec3>,
}

/// An owned tessellation result.
#[derive(Clone, Debug)]
pub struct TessellatedMesh {
    pub vertices: Vec<f32>,
    pub normals: Vec<f32>,
    pub vertex_count: usize,
}

/// Tessellate `footprint` into freshly allocated buffers.
pub fn tessellate(footprint: &ChunkFootprint, heightmap: &dyn Heightmap) -> TessellatedMesh {
    let mut vertices = vec![0.0; footprint.float_count()];
    let mut normals = vec![0.0; footprint.float_count()];
    let vertex_count = tessellate_into(
        footprint,
        heightmap,
        &mut vertices,
        &mut normals,
        &mut TessellationScratch::default(),
    );
    TessellatedMesh {
        vertices,
        normals,
        vertex_count,
    }
}

/// Tessellate `footprint` into caller-provided buffers and return the number
/// of vertices written.
///
/// # Panics
///
/// Panics if either output holds fewer than [`ChunkFootprint::float_count`]
/// floats.
pub fn tessellate_into(
    footprint: &ChunkFootprint,
    heightmap: &dyn Heightmap,
    vertices: &mut [f32],
    normals: &mut [f32],
    scratch: &mut TessellationScratch,
) -> usize {
    let floats = footprint.float_count();
    assert!(
        vertices.len() >= floats && normals.len() >= floats,
        "output buffers hold {} and {} floats, chunk needs {floats}",
        vertices.len(),
        normals.len()
    );

    let n = footprint.quads_per_side() as usize;
    let grid = n + 1;
    let spacing = footprint.vertex_spacing();
    let (first_x, first_z) = footprint.first_vertex();

    scratch.heights.clear();
    for j in 0..grid {
        let wz = footprint.lattice_coord(first_z + j as u64);
        for i in 0..grid {
            let wx = footprint.lattice_coord(first_x + i as u64);
            scratch.heights.push(heightmap.height(wx, wz) as f32);
        }
    }

    let corner = |i: usize, j: usize, heights: &[f32]| {
        Vec3::new(
            (i as f64 * spacing) as f32,
            heights[j * grid + i],
            (j as f64 * spacing) as f32,
        )
    };

    scratch.faces.clear();
    for j in 0..n {
        for i in 0..n {
            let nw = corner(i, j, &scratch.heights);
            let sw = corner(i, j + 1, &scratch.heights);
            let se = corner(i + 1, j + 1, &scratch.heights);
            let ne = corner(i + 1, j, &scratch.heights);

            let base = (j * n + i) * 6 * 3;
            for (k, p) in [nw, sw, se, nw, se, ne].into_iter().enumerate() {
                vertices[base + k * 3..base + k * 3 + 3].copy_from_slice(&p.to_array());
            }
            scratch
                .faces
                .push((sw - nw).cross(ne - nw).normalize_or(Vec3::Y));
        }
    }

    // Each grid vertex averages the faces of the up to four quads around it.
    let vertex_normal = |i: usize, j: usize| {
        let mut sum = Vec3::ZERO;
        let (west, north) = (i.wrapping_sub(1), j.wrapping_sub(1));
        for (qi, qj) in [(west, north), (i, north), (west, j), (i, j)] {
            if qi < n && qj < n {
                sum += scratch.faces[qj * n + qi];
            }
        }
        sum.normalize_or(Vec3::Y)
    };

    for j in 0..n {
        for i in 0..n {
            let nw = vertex_normal(i, j);
            let sw = vertex_normal(i, j + 1);
            let se = vertex_normal(i + 1, j + 1);
            let ne = vertex_normal(i + 1, j);

            let base = (j * n + i) * 6 * 3;
            for (k, normal) in [nw, sw, se, nw, se, ne].into_iter().enumerate() {
                normals[base + k * 3..base + k * 3 + 3].copy_from_slice(&normal.to_array());
            }
        }
    }

    footprint.vertex_count()
}
