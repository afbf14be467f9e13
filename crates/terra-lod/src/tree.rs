//! The quadtree arena and its structural operations.
//!
//! Nodes live in a fixed-capacity [`SlotPool`]; parent, child, and neighbor
//! links are [`NodeId`] handles into it. Node coordinates are not stored and
//! are threaded through traversals instead.

use std::ops::Index;

use terra_pool::{PoolError, SlotPool};
use terra_render::{ChunkObject, GpuBufferPool};

use crate::node::{NodeId, NodeShape, NodeStatus, QuadNode, Side, child_index};

/// A node reached by [`QuadTree::visit`], with its grid coordinates.
#[derive(Clone, Copy, Debug)]
pub struct NodeVisit<'a> {
    pub id: NodeId,
    pub x: u32,
    pub z: u32,
    pub level: u32,
    pub node: &'a QuadNode,
}

/// Quadtree over a square domain, rooted at level 0.
pub struct QuadTree {
    nodes: SlotPool<QuadNode>,
    root: NodeId,
}

/// Return a chunk's buffers. A refused release means the buffers were never
/// checked out, which the tree cannot recover from.
pub(crate) fn release_object(object: ChunkObject, buffers: &mut GpuBufferPool) {
    if let Err(e) = object.destroy(buffers) {
        panic!("chunk buffers were not checked out of `{}`: {e}", buffers.name());
    }
}

impl QuadTree {
    /// Create a tree with room for `capacity` nodes, holding an empty root.
    pub fn new(capacity: usize) -> Result<Self, PoolError> {
        let mut nodes = SlotPool::with_capacity("quadtree_nodes", capacity);
        let root = NodeId(nodes.acquire(QuadNode::empty(None))?);
        Ok(Self { nodes, root })
    }

    pub fn root(&self) -> NodeId {
        self.root
    }

    pub fn node(&self, id: NodeId) -> Option<&QuadNode> {
        self.nodes.get(id.0)
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.nodes.contains(id.0)
    }

    /// Live nodes, the root included.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.nodes.capacity()
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> &mut QuadNode {
        &mut self.nodes[id.0]
    }

    /// Iterate over all live nodes in arena order.
    pub fn iter(&self) -> impl Iterator<Item = (NodeId, &QuadNode)> {
        self.nodes.iter().map(|(slot, node)| (NodeId(slot), node))
    }

    /// Locate the node at `(x, z, level)` by descending from the root.
    pub fn find(&self, x: u32, z: u32, level: u32) -> Option<NodeId> {
        if level >= 32 || x >> level != 0 || z >> level != 0 {
            return None;
        }
        let mut id = self.root;
        for depth in (0..level).rev() {
            let children = self[id].children()?;
            id = children[child_index((x >> depth) & 1, (z >> depth) & 1)];
        }
        Some(id)
    }

    /// True if any strict ancestor of `id` holds a chunk.
    pub fn has_resident_ancestor(&self, id: NodeId) -> bool {
        let mut parent = self[id].parent;
        while let Some(p) = parent {
            if self[p].is_resident() {
                return true;
            }
            parent = self[p].parent;
        }
        false
    }

    /// Depth-first walk over every node with its coordinates.
    pub fn visit(&self, mut f: impl FnMut(NodeVisit<'_>)) {
        let mut stack = vec![(self.root, 0, 0, 0)];
        while let Some((id, x, z, level)) = stack.pop() {
            let node = &self[id];
            f(NodeVisit {
                id,
                x,
                z,
                level,
                node,
            });
            if let Some(children) = node.children() {
                for (i, &child) in children.iter().enumerate().rev() {
                    let (cx, cz) = (i as u32 % 2, i as u32 / 2);
                    stack.push((child, x * 2 + cx, z * 2 + cz, level + 1));
                }
            }
        }
    }

    /// Give a leaf four empty children and wire their neighbor links.
    ///
    /// Any chunk the node holds stays with it. Fails without side effects if
    /// the arena cannot hold four more nodes.
    ///
    /// # Panics
    ///
    /// Panics if the node is already internal.
    pub(crate) fn subdivide(&mut self, id: NodeId) -> Result<[NodeId; 4], PoolError> {
        assert!(self[id].is_leaf(), "cannot subdivide internal node {id:?}");
        if self.nodes.capacity() - self.nodes.len() < 4 {
            return Err(PoolError::Exhausted {
                pool: self.nodes.name().to_string(),
                capacity: self.nodes.capacity(),
            });
        }

        let mut children = [id; 4];
        for child in &mut children {
            *child = NodeId(self.nodes.acquire(QuadNode::empty(Some(id)))?);
        }
        let outer = self[id].neighbors;
        self.node_mut(id).shape = NodeShape::Internal { children };

        for (i, &child) in children.iter().enumerate() {
            let (cx, cz) = (i as i32 % 2, i as i32 / 2);
            for side in Side::ALL {
                let (dx, dz) = side.step();
                let (nx, nz) = (cx + dx, cz + dz);
                let inside = (0..2).contains(&nx) && (0..2).contains(&nz);
                let mirrored = child_index(nx.rem_euclid(2) as u32, nz.rem_euclid(2) as u32);

                let link = if inside {
                    Some(children[mirrored])
                } else {
                    outer[side.index()]
                        .and_then(|n| self[n].children())
                        .map(|cousins| cousins[mirrored])
                };
                self.node_mut(child).neighbors[side.index()] = link;
                if !inside && let Some(cousin) = link {
                    self.node_mut(cousin).neighbors[side.opposite().index()] = Some(child);
                }
            }
        }
        Ok(children)
    }

    /// Delete every descendant of `id`, keeping the node and its payload.
    ///
    /// Descendant chunks are destroyed; descendant requests still in flight
    /// will find no node when they complete.
    pub(crate) fn merge(&mut self, id: NodeId, buffers: &mut GpuBufferPool) {
        let Some(children) = self[id].children() else {
            return;
        };
        self.node_mut(id).shape = NodeShape::Leaf;

        let mut stack = children.to_vec();
        while let Some(doomed) = stack.pop() {
            let node = match self.nodes.release(doomed.0) {
                Ok(node) => node,
                Err(e) => panic!("quadtree links to a dead node: {e}"),
            };
            for side in Side::ALL {
                if let Some(n) = node.neighbors[side.index()]
                    && let Some(neighbor) = self.nodes.get_mut(n.0)
                    && neighbor.neighbors[side.opposite().index()] == Some(doomed)
                {
                    neighbor.neighbors[side.opposite().index()] = None;
                }
            }
            if let Some(grandchildren) = node.children() {
                stack.extend(grandchildren);
            }
            if let NodeStatus::Resident(chunk) = node.status {
                release_object(chunk.object, buffers);
            }
        }
        self.update_coverage(id);
    }

    /// Drop the node's chunk or abandon its request.
    pub(crate) fn demote(&mut self, id: NodeId, buffers: &mut GpuBufferPool) {
        let status = std::mem::replace(&mut self.node_mut(id).status, NodeStatus::Empty);
        if let NodeStatus::Resident(chunk) = status {
            release_object(chunk.object, buffers);
        }
        self.update_coverage(id);
    }

    /// Recompute `covered` for `id` and carry changes up the parent chain.
    ///
    /// The walk stops at a resident ancestor, which is covered regardless, or
    /// at the first ancestor whose flag does not change.
    pub(crate) fn update_coverage(&mut self, id: NodeId) {
        let covered = self.computed_coverage(id);
        self.node_mut(id).covered = covered;

        let mut parent = self[id].parent;
        while let Some(p) = parent {
            if self[p].is_resident() {
                break;
            }
            let covered = self.computed_coverage(p);
            if covered == self[p].covered {
                break;
            }
            self.node_mut(p).covered = covered;
            parent = self[p].parent;
        }
    }

    fn computed_coverage(&self, id: NodeId) -> bool {
        self[id].is_resident() || self.children_covered(id)
    }

    /// True if `id` is internal and all four children are covered.
    pub fn children_covered(&self, id: NodeId) -> bool {
        self[id]
            .children()
            .is_some_and(|children| children.iter().all(|&c| self[c].covered))
    }

    /// Show or hide the first chunk on every downward path below `id`.
    ///
    /// Chunks are only shown if no strict ancestor of `id` holds a chunk,
    /// since that ancestor is what is drawn over this domain.
    pub(crate) fn set_boundary_visibility(&mut self, id: NodeId, visible: bool) {
        if visible && self.has_resident_ancestor(id) {
            return;
        }
        let mut stack: Vec<NodeId> = self[id].children().map(Vec::from).unwrap_or_default();
        while let Some(next) = stack.pop() {
            let node = self.node_mut(next);
            if let Some(chunk) = node.chunk_mut() {
                chunk.object.set_visible(visible);
                continue;
            }
            if let Some(children) = node.children() {
                stack.extend(children);
            }
        }
    }

    /// Tear the tree down to an empty root, destroying every chunk.
    pub(crate) fn clear(&mut self, buffers: &mut GpuBufferPool) {
        let root = self.root;
        self.merge(root, buffers);
        self.demote(root, buffers);
    }
}

impl Index<NodeId> for QuadTree {
    type Output = QuadNode;

    fn index(&self, id: NodeId) -> &QuadNode {
        &self.nodes[id.0]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    use glam::Vec3;
    use terra_render::HostBackend;

    use crate::node::Chunk;

    fn buffers() -> GpuBufferPool {
        let mut backend = HostBackend::new(1);
        GpuBufferPool::create(&mut backend, "chunks", 18, 64).unwrap()
    }

    fn make_resident(tree: &mut QuadTree, id: NodeId, buffers: &mut GpuBufferPool) {
        let object = ChunkObject::new(
            buffers.acquire().unwrap(),
            buffers.acquire().unwrap(),
            6,
            Vec3::ZERO,
        );
        tree.node_mut(id).status = NodeStatus::Resident(Chunk::new(object));
        tree.update_coverage(id);
    }

    /// Every link points at the same-level node on that side, and back.
    fn assert_neighbors_consistent(tree: &QuadTree) {
        let mut by_coord = HashMap::new();
        tree.visit(|v| {
            by_coord.insert((v.x as i64, v.z as i64, v.level), v.id);
        });
        tree.visit(|v| {
            for side in Side::ALL {
                let (dx, dz) = side.step();
                let expected = by_coord
                    .get(&(v.x as i64 + dx as i64, v.z as i64 + dz as i64, v.level))
                    .copied();
                assert_eq!(
                    v.node.neighbor(side),
                    expected,
                    "{side:?} of ({}, {}, {})",
                    v.x,
                    v.z,
                    v.level
                );
                if let Some(n) = expected {
                    assert_eq!(tree[n].neighbor(side.opposite()), Some(v.id));
                }
            }
        });
    }

    #[test]
    fn test_subdivide_wires_siblings() {
        let mut tree = QuadTree::new(16).unwrap();
        let root = tree.root();
        let [nw, ne, sw, se] = tree.subdivide(root).unwrap();
        assert_eq!(tree[nw].neighbor(Side::East), Some(ne));
        assert_eq!(tree[nw].neighbor(Side::South), Some(sw));
        assert_eq!(tree[se].neighbor(Side::West), Some(sw));
        assert_eq!(tree[se].neighbor(Side::North), Some(ne));
        assert_eq!(tree[nw].neighbor(Side::West), None);
        assert_eq!(tree[nw].parent(), Some(root));
        assert_neighbors_consistent(&tree);
    }

    #[test]
    fn test_subdivide_links_cousins_both_ways() {
        let mut tree = QuadTree::new(64).unwrap();
        let root = tree.root();
        let [a, b, c, _] = tree.subdivide(root).unwrap();
        tree.subdivide(a).unwrap();
        tree.subdivide(c).unwrap();
        // b is subdivided last and must link back into a's children.
        tree.subdivide(b).unwrap();
        assert_neighbors_consistent(&tree);

        let a_children = tree[a].children().unwrap();
        let deep = tree.subdivide(a_children[3]).unwrap();
        assert_neighbors_consistent(&tree);
        assert_eq!(tree.find(3, 3, 3), Some(deep[3]));
    }

    #[test]
    fn test_merge_clears_back_links() {
        let mut tree = QuadTree::new(64).unwrap();
        let mut pool = buffers();
        let root = tree.root();
        let [a, b, _, _] = tree.subdivide(root).unwrap();
        tree.subdivide(a).unwrap();
        tree.subdivide(b).unwrap();
        let before = tree.len();

        tree.merge(a, &mut pool);
        assert_eq!(tree.len(), before - 4);
        assert!(tree[a].is_leaf());
        assert_neighbors_consistent(&tree);
    }

    #[test]
    fn test_merge_destroys_descendant_chunks() {
        let mut tree = QuadTree::new(16).unwrap();
        let mut pool = buffers();
        let root = tree.root();
        let children = tree.subdivide(root).unwrap();
        for &c in &children {
            make_resident(&mut tree, c, &mut pool);
        }
        assert_eq!(pool.in_use(), 8);
        tree.merge(root, &mut pool);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(tree.len(), 1);
        for c in children {
            assert!(!tree.contains(c));
        }
    }

    #[test]
    fn test_subdivide_fails_cleanly_when_arena_full() {
        let mut tree = QuadTree::new(4).unwrap();
        let root = tree.root();
        assert!(matches!(
            tree.subdivide(root),
            Err(PoolError::Exhausted { .. })
        ));
        assert!(tree[root].is_leaf());
        assert_eq!(tree.len(), 1);
    }

    #[test]
    #[should_panic(expected = "cannot subdivide internal node")]
    fn test_subdivide_internal_panics() {
        let mut tree = QuadTree::new(16).unwrap();
        let root = tree.root();
        tree.subdivide(root).unwrap();
        let _ = tree.subdivide(root);
    }

    #[test]
    fn test_find() {
        let mut tree = QuadTree::new(16).unwrap();
        let root = tree.root();
        let children = tree.subdivide(root).unwrap();
        assert_eq!(tree.find(0, 0, 0), Some(root));
        assert_eq!(tree.find(1, 0, 1), Some(children[1]));
        assert_eq!(tree.find(0, 1, 1), Some(children[2]));
        assert_eq!(tree.find(0, 0, 2), None);
        assert_eq!(tree.find(2, 0, 1), None);
    }

    #[test]
    fn test_coverage_chain() {
        let mut tree = QuadTree::new(64).unwrap();
        let mut pool = buffers();
        let root = tree.root();
        let children = tree.subdivide(root).unwrap();
        let grandchildren = tree.subdivide(children[0]).unwrap();

        for &c in &children[1..] {
            make_resident(&mut tree, c, &mut pool);
        }
        assert!(!tree[root].is_covered());

        for (i, &g) in grandchildren.iter().enumerate() {
            assert!(!tree[children[0]].is_covered());
            make_resident(&mut tree, g, &mut pool);
            assert_eq!(tree[children[0]].is_covered(), i == 3);
        }
        assert!(tree[root].is_covered());
        assert!(tree.children_covered(root));
    }

    #[test]
    fn test_coverage_stops_at_resident_ancestor() {
        let mut tree = QuadTree::new(16).unwrap();
        let mut pool = buffers();
        let root = tree.root();
        make_resident(&mut tree, root, &mut pool);
        let children = tree.subdivide(root).unwrap();
        assert!(tree[root].is_covered());
        make_resident(&mut tree, children[0], &mut pool);
        assert!(tree[children[0]].is_covered());
        assert!(!tree.children_covered(root));
    }

    #[test]
    fn test_boundary_visibility() {
        let mut tree = QuadTree::new(64).unwrap();
        let mut pool = buffers();
        let root = tree.root();
        let children = tree.subdivide(root).unwrap();
        let grandchildren = tree.subdivide(children[0]).unwrap();
        make_resident(&mut tree, children[1], &mut pool);
        make_resident(&mut tree, grandchildren[2], &mut pool);
        make_resident(&mut tree, children[0], &mut pool);

        tree.set_boundary_visibility(root, false);
        assert!(!tree[children[1]].is_visible());
        assert!(!tree[children[0]].is_visible());
        // Below the first chunk on its path.
        assert!(tree[grandchildren[2]].is_visible());

        tree.set_boundary_visibility(root, true);
        assert!(tree[children[0]].is_visible());
        assert!(tree[children[1]].is_visible());

        // Not revealed under a resident ancestor.
        tree.set_boundary_visibility(children[0], false);
        make_resident(&mut tree, root, &mut pool);
        tree.set_boundary_visibility(children[0], true);
        assert!(!tree[grandchildren[2]].is_visible());
    }

    #[test]
    fn test_clear_returns_everything() {
        let mut tree = QuadTree::new(64).unwrap();
        let mut pool = buffers();
        let root = tree.root();
        make_resident(&mut tree, root, &mut pool);
        let children = tree.subdivide(root).unwrap();
        make_resident(&mut tree, children[3], &mut pool);
        tree.clear(&mut pool);
        assert_eq!(pool.in_use(), 0);
        assert_eq!(tree.len(), 1);
        assert!(tree[root].is_empty() && tree[root].is_leaf());
    }
}
