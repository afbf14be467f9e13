//! Crack hiding between chunks of different levels.
//!
//! Where a chunk borders a coarser drawn chunk, the fine chunk's boundary
//! vertices are pulled onto the coarse edge by interpolating the heightmap
//! between the coarse grid points. Only the Y component is rewritten, in
//! place, with partial buffer writes.

use terra_render::{BufferId, GpuBackend, GpuError};
use terra_terrain::{ChunkFootprint, Heightmap};

use crate::node::{NodeId, Side};
use crate::tree::QuadTree;

/// `(vertex offset within a quad, step along the side)` for the boundary
/// corners of one side's quads.
fn side_corners(side: Side) -> [(usize, usize); 3] {
    match side {
        Side::West => [(0, 0), (3, 0), (1, 1)],
        Side::East => [(2, 1), (4, 1), (5, 0)],
        Side::North => [(0, 0), (3, 0), (5, 1)],
        Side::South => [(1, 0), (2, 1), (4, 1)],
    }
}

/// Quad `(i, j)` on `side` at position `k` along it.
fn side_quad(side: Side, n: usize, k: usize) -> (usize, usize) {
    match side {
        Side::West => (0, k),
        Side::East => (n - 1, k),
        Side::North => (k, 0),
        Side::South => (k, n - 1),
    }
}

/// Fill `out` with the `n + 1` boundary heights of one side, stitched to a
/// neighbour `delta` levels coarser.
///
/// Heights on the coarse lattice are sampled exactly; the rest are linearly
/// interpolated between the two enclosing coarse points. A delta of zero
/// reproduces the tessellator's heights bit for bit.
pub fn side_heights(
    footprint: &ChunkFootprint,
    side: Side,
    delta: u8,
    heightmap: &dyn Heightmap,
    out: &mut Vec<f32>,
) {
    let n = u64::from(footprint.quads_per_side());
    let (first_x, first_z) = footprint.first_vertex();
    let (fixed, first_along) = match side {
        Side::West => (first_x, first_z),
        Side::East => (first_x + n, first_z),
        Side::North => (first_z, first_x),
        Side::South => (first_z + n, first_x),
    };
    let fixed = footprint.lattice_coord(fixed);
    let sample = |along: u64| {
        let along = footprint.lattice_coord(along);
        match side {
            Side::West | Side::East => heightmap.height(fixed, along),
            Side::North | Side::South => heightmap.height(along, fixed),
        }
    };

    let step = 1u64 << delta;
    out.clear();
    for k in 0..=n {
        let g = first_along + k;
        let g0 = (g >> delta) << delta;
        let height = if g == g0 {
            sample(g)
        } else {
            let t = (g - g0) as f64 / step as f64;
            let (h0, h1) = (sample(g0), sample(g0 + step));
            h0 + (h1 - h0) * t
        };
        out.push(height as f32);
    }
}

/// Write `heights` into the Y of every boundary vertex on `side` and return
/// the number of writes issued.
///
/// # Panics
///
/// Panics if `heights` does not hold one value per boundary grid vertex.
pub fn stitch_side<B: GpuBackend + ?Sized>(
    backend: &mut B,
    buffer: BufferId,
    footprint: &ChunkFootprint,
    side: Side,
    heights: &[f32],
) -> Result<usize, GpuError> {
    let n = footprint.quads_per_side() as usize;
    assert_eq!(heights.len(), n + 1, "one height per boundary vertex");

    let mut writes = 0;
    for k in 0..n {
        let (i, j) = side_quad(side, n, k);
        for (offset, along) in side_corners(side) {
            let vertex = (j * n + i) * 6 + offset;
            backend.write_floats(buffer, vertex * 3 + 1, &heights[k + along..=k + along])?;
            writes += 1;
        }
    }
    Ok(writes)
}

/// Level difference between the node at `level` and the chunk drawn across
/// its `side`, or zero at the domain edge and where finer chunks border it.
pub(crate) fn neighbor_delta(tree: &QuadTree, id: NodeId, level: u32, side: Side) -> u8 {
    let mut node = id;
    let mut neighbor_level = level;
    let neighbor = loop {
        if let Some(neighbor) = tree[node].neighbor(side) {
            break neighbor;
        }
        match tree[node].parent() {
            Some(parent) => {
                node = parent;
                neighbor_level -= 1;
            }
            None => return 0,
        }
    };

    let mut candidate = Some(neighbor);
    while let Some(current) = candidate {
        if tree[current].is_visible() {
            return (level - neighbor_level) as u8;
        }
        candidate = tree[current].parent();
        neighbor_level = neighbor_level.saturating_sub(1);
    }
    0
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec3;
    use terra_render::{ChunkObject, GpuBufferPool, HostBackend, chunk_buffer_len};
    use terra_terrain::tessellate;

    use crate::node::{Chunk, NodeStatus};

    fn ramp(x: f64, z: f64) -> f64 {
        (x * 0.013).sin() * 40.0 + (z * 0.021).cos() * 25.0
    }

    fn footprint(x: u32, z: u32, level: u32) -> ChunkFootprint {
        ChunkFootprint {
            x,
            z,
            level,
            tessellation: 2,
            root_size: 1000.0,
        }
    }

    #[test]
    fn test_zero_delta_matches_tessellation() {
        let fp = footprint(1, 2, 2);
        let mesh = tessellate(&fp, &ramp);
        let n = 4;
        let mut heights = Vec::new();
        side_heights(&fp, Side::East, 0, &ramp, &mut heights);
        assert_eq!(heights.len(), n + 1);
        for k in 0..n {
            // NE corner of quad (n - 1, k).
            let vertex = (k * n + n - 1) * 6 + 5;
            assert_eq!(heights[k], mesh.vertices[vertex * 3 + 1]);
        }
    }

    #[test]
    fn test_delta_interpolates_between_coarse_points() {
        let fp = footprint(1, 0, 2);
        let mut heights = Vec::new();
        side_heights(&fp, Side::North, 1, &ramp, &mut heights);

        let spacing = fp.vertex_spacing();
        let x0 = fp.origin().0;
        for (k, &h) in heights.iter().enumerate() {
            let x = x0 + k as f64 * spacing;
            let expected = if k % 2 == 0 {
                ramp(x, 0.0)
            } else {
                (ramp(x - spacing, 0.0) + ramp(x + spacing, 0.0)) / 2.0
            };
            assert!((f64::from(h) - expected).abs() < 1e-3, "k = {k}");
        }
    }

    #[test]
    fn test_offset_chunk_aligns_to_coarse_lattice() {
        // Chunk (1, 0, 3) with four quads starts at lattice index 4; at delta 3
        // the coarse points are 0 and 8.
        let fp = footprint(1, 0, 3);
        let mut heights = Vec::new();
        side_heights(&fp, Side::South, 3, &|x: f64, _z: f64| x, &mut heights);
        let spacing = fp.vertex_spacing() as f32;
        for (k, &h) in heights.iter().enumerate() {
            let expected = (4 + k) as f32 * spacing;
            assert!((h - expected).abs() < 1e-3);
        }
    }

    #[test]
    fn test_stitch_side_touches_only_boundary_y() {
        let fp = footprint(0, 0, 1);
        let mesh = tessellate(&fp, &ramp);
        let mut backend = HostBackend::new(1);
        let buffer = backend.create_buffer("chunk", chunk_buffer_len(2)).unwrap();
        backend.write_floats(buffer, 0, &mesh.vertices).unwrap();

        let heights = vec![-1.0; 5];
        let writes = stitch_side(&mut backend, buffer, &fp, Side::West, &heights).unwrap();
        assert_eq!(writes, 12);

        let data = backend.read_floats(buffer).unwrap();
        let n = 4;
        for (index, (&after, &before)) in data.iter().zip(&mesh.vertices).enumerate() {
            let vertex = index / 3;
            let (quad, offset) = (vertex / 6, vertex % 6);
            let on_west = quad % n == 0 && matches!(offset, 0 | 1 | 3);
            if on_west && index % 3 == 1 {
                assert_eq!(after, -1.0);
            } else {
                assert_eq!(after, before);
            }
        }
    }

    #[test]
    fn test_neighbor_delta() {
        let mut tree = QuadTree::new(64).unwrap();
        let root = tree.root();
        let [a, b, c, _] = tree.subdivide(root).unwrap();
        let a_children = tree.subdivide(a).unwrap();

        // Nothing is drawn, so every side reads as unstitched.
        assert_eq!(neighbor_delta(&tree, a_children[1], 2, Side::East), 0);

        let mut backend = HostBackend::new(1);
        let mut buffers = GpuBufferPool::create(&mut backend, "chunks", 18, 8).unwrap();
        for id in [b, c] {
            let object = ChunkObject::new(
                buffers.acquire().unwrap(),
                buffers.acquire().unwrap(),
                6,
                Vec3::ZERO,
            );
            tree.node_mut(id).status = NodeStatus::Resident(Chunk::new(object));
        }

        assert_eq!(neighbor_delta(&tree, a_children[1], 2, Side::East), 1);
        assert_eq!(neighbor_delta(&tree, a_children[3], 2, Side::East), 1);
        assert_eq!(neighbor_delta(&tree, a_children[2], 2, Side::South), 1);
        // Sibling neighbours at the same level that draw nothing.
        assert_eq!(neighbor_delta(&tree, a_children[0], 2, Side::East), 0);
        // Domain edge.
        assert_eq!(neighbor_delta(&tree, a_children[0], 2, Side::North), 0);
        // Finer geometry borders b on the west.
        assert_eq!(neighbor_delta(&tree, b, 1, Side::West), 0);
    }
}
