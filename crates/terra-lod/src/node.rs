//! Quadtree node types.

use terra_pool::SlotId;
use terra_render::ChunkObject;

/// Handle to a node in the quadtree arena.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct NodeId(pub(crate) SlotId);

/// A side of a square footprint. North is `-z`, west is `-x`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Side {
    North,
    East,
    South,
    West,
}

impl Side {
    pub const ALL: [Side; 4] = [Side::North, Side::East, Side::South, Side::West];

    pub fn opposite(self) -> Side {
        match self {
            Side::North => Side::South,
            Side::East => Side::West,
            Side::South => Side::North,
            Side::West => Side::East,
        }
    }

    /// Grid step towards the adjacent node on this side.
    pub fn step(self) -> (i32, i32) {
        match self {
            Side::North => (0, -1),
            Side::East => (1, 0),
            Side::South => (0, 1),
            Side::West => (-1, 0),
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// Child index of the quadrant `(cx, cz)`, each 0 or 1.
pub(crate) fn child_index(cx: u32, cz: u32) -> usize {
    (cz * 2 + cx) as usize
}

/// Whether a node has children.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeShape {
    Leaf,
    /// Children indexed `z * 2 + x`.
    Internal { children: [NodeId; 4] },
}

/// Payload state of a node.
#[derive(Debug)]
pub enum NodeStatus {
    Empty,
    /// A generation request is in flight.
    Awaiting,
    Resident(Chunk),
}

/// A resident chunk and the seam stitching applied to it.
#[derive(Debug)]
pub struct Chunk {
    pub(crate) object: ChunkObject,
    /// Level difference each side is currently stitched to, by [`Side::index`].
    pub(crate) seams: [u8; 4],
}

impl Chunk {
    pub(crate) fn new(object: ChunkObject) -> Self {
        Self {
            object,
            seams: [0; 4],
        }
    }

    pub fn object(&self) -> &ChunkObject {
        &self.object
    }

    /// Level difference the given side is stitched to; 0 when unstitched.
    pub fn seam(&self, side: Side) -> u8 {
        self.seams[side.index()]
    }
}

/// A node of the terrain quadtree.
///
/// Shape and status are independent: an internal node can still hold a
/// chunk while its children are being generated, or be awaiting a coarser
/// chunk that will replace them.
#[derive(Debug)]
pub struct QuadNode {
    pub(crate) shape: NodeShape,
    pub(crate) status: NodeStatus,
    pub(crate) covered: bool,
    pub(crate) parent: Option<NodeId>,
    pub(crate) neighbors: [Option<NodeId>; 4],
}

impl QuadNode {
    pub(crate) fn empty(parent: Option<NodeId>) -> Self {
        Self {
            shape: NodeShape::Leaf,
            status: NodeStatus::Empty,
            covered: false,
            parent,
            neighbors: [None; 4],
        }
    }

    pub fn shape(&self) -> NodeShape {
        self.shape
    }

    pub fn status(&self) -> &NodeStatus {
        &self.status
    }

    pub fn children(&self) -> Option<[NodeId; 4]> {
        match self.shape {
            NodeShape::Leaf => None,
            NodeShape::Internal { children } => Some(children),
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.shape, NodeShape::Leaf)
    }

    pub fn is_empty(&self) -> bool {
        matches!(self.status, NodeStatus::Empty)
    }

    pub fn is_awaiting(&self) -> bool {
        matches!(self.status, NodeStatus::Awaiting)
    }

    pub fn is_resident(&self) -> bool {
        matches!(self.status, NodeStatus::Resident(_))
    }

    /// True if this node or its descendants draw every point of its footprint.
    pub fn is_covered(&self) -> bool {
        self.covered
    }

    pub fn parent(&self) -> Option<NodeId> {
        self.parent
    }

    /// Same-level node adjacent on `side`, if one exists.
    pub fn neighbor(&self, side: Side) -> Option<NodeId> {
        self.neighbors[side.index()]
    }

    pub fn chunk(&self) -> Option<&Chunk> {
        match &self.status {
            NodeStatus::Resident(chunk) => Some(chunk),
            _ => None,
        }
    }

    pub(crate) fn chunk_mut(&mut self) -> Option<&mut Chunk> {
        match &mut self.status {
            NodeStatus::Resident(chunk) => Some(chunk),
            _ => None,
        }
    }

    /// True if this node holds a chunk that is currently drawn.
    pub fn is_visible(&self) -> bool {
        self.chunk().is_some_and(|c| c.object.is_visible())
    }
}
