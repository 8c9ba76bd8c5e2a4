//! Data structures for arena-based octrees.
use std::collections::HashMap;

use num::Float;
use rlst::RlstScalar;

/// Represents a three-dimensional box characterized by its origin and side-length along the Cartesian axes.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct Domain<T>
where
    T: RlstScalar,
{
    /// The lower left corner of the domain, minimum of x, y, z values.
    pub origin: [T; 3],

    /// The extent of the point distribution along the x, y, z axes respectively.
    pub side_length: [T; 3],
}

/// Identifies a box within an octree by its refinement level and its grid
/// coordinate at that level.
///
/// At level `l` the domain is partitioned into `2^l` boxes per axis; `index`
/// is the integer coordinate of the box in that grid. All tree relations
/// (parent, children, neighbours, adjacency) are arithmetic on these
/// coordinates, so keys never dangle and need no encoding step.
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BoxKey {
    /// Refinement level, root is level 0.
    pub level: u32,

    /// Grid coordinate of the box at `level`, each component in `0..2^level`.
    pub index: [u32; 3],
}

/// A node stored in the octree arena.
///
/// The engine reads `density` and writes `field`; every other buffer used
/// during an evaluation is owned by the engine and indexed by the node's
/// arena position.
#[derive(Debug, Clone, Default)]
pub struct NodeData<T>
where
    T: RlstScalar,
{
    /// Geometric key of this node.
    pub key: BoxKey,

    /// Arena index of the parent, `None` for the root.
    pub parent: Option<usize>,

    /// Arena indices of the eight children in octant order, `None` for leaves.
    pub children: Option<[usize; 8]>,

    /// Leaf flag.
    pub leaf: bool,

    /// Ghost flag; ghost nodes belong to another process and are skipped by
    /// the multipole initialiser and the output merger.
    pub ghost: bool,

    /// Chebyshev coefficients of the density carried by this node (leaves).
    pub density: Vec<T>,

    /// Chebyshev coefficients of the evaluated field, written by the output
    /// merger.
    pub field: Vec<T>,
}

/// An octree over a cubic domain with all nodes held in an arena.
///
/// Relations are arena indices throughout; `key_to_index` supports geometric
/// lookups during interaction-list construction. Node order within each
/// level list is sorted by key and therefore stable for a fixed tree shape.
#[derive(Debug, Clone, Default)]
pub struct Octree<T>
where
    T: RlstScalar + Float,
{
    /// The cubic domain spanned by the root box.
    pub domain: Domain<T>,

    /// Deepest leaf level.
    pub depth: u32,

    /// Node storage; index 0 is the root.
    pub nodes: Vec<NodeData<T>>,

    /// Geometric key to arena index.
    pub key_to_index: HashMap<BoxKey, usize>,

    /// Arena indices of the nodes at each level, sorted by key.
    pub levels: Vec<Vec<usize>>,

    /// Arena indices of all leaves, sorted by key.
    pub leaves: Vec<usize>,
}
