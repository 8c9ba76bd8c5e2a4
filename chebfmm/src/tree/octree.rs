//! Arena octree construction and access.
use std::collections::{HashMap, HashSet};

use itertools::iproduct;
use num::Float;
use rlst::RlstScalar;

use crate::traits::types::FmmError;
use crate::tree::types::{BoxKey, Domain, NodeData, Octree};

impl<T> Octree<T>
where
    T: RlstScalar<Real = T> + Float + Default,
{
    /// A uniform octree with every leaf at `depth`.
    pub fn uniform(domain: Domain<T>, depth: u32) -> Result<Self, FmmError> {
        if depth == 0 {
            return Err(FmmError::Failed(
                "an octree requires depth of at least 1".to_string(),
            ));
        }
        let cells = 1u32 << depth;
        let leaves: Vec<BoxKey> = iproduct!(0..cells, 0..cells, 0..cells)
            .map(|(i, j, k)| BoxKey::new(depth, [i, j, k]))
            .collect();
        Self::from_leaves(domain, &leaves)
    }

    /// An adaptive octree from a prescribed leaf cover.
    ///
    /// The leaves must partition the domain exactly and be 2:1 balanced:
    /// adjacent leaves differ by at most one level. Both properties are
    /// validated here since every interaction-list invariant depends on
    /// them.
    pub fn from_leaves(domain: Domain<T>, leaves: &[BoxKey]) -> Result<Self, FmmError> {
        if domain.side_length[0] != domain.side_length[1]
            || domain.side_length[0] != domain.side_length[2]
        {
            return Err(FmmError::Failed(
                "octree domains must be cubic".to_string(),
            ));
        }
        if leaves.is_empty() {
            return Err(FmmError::Failed("empty leaf cover".to_string()));
        }

        let leaf_set: HashSet<BoxKey> = leaves.iter().copied().collect();
        if leaf_set.len() != leaves.len() {
            return Err(FmmError::Failed("duplicate leaves in cover".to_string()));
        }

        let depth = leaves.iter().map(|leaf| leaf.level).max().unwrap();
        if depth == 0 {
            return Err(FmmError::Failed(
                "an octree requires depth of at least 1".to_string(),
            ));
        }

        let mut covered = 0usize;
        Self::check_cover(&BoxKey::root(), &leaf_set, depth, &mut covered)?;
        if covered != leaf_set.len() {
            return Err(FmmError::Failed(
                "leaf cover contains overlapping boxes".to_string(),
            ));
        }

        for (i, a) in leaves.iter().enumerate() {
            for b in leaves.iter().skip(i + 1) {
                if a.is_adjacent(b) && a.level.abs_diff(b.level) > 1 {
                    return Err(FmmError::Failed(format!(
                        "leaf cover is not 2:1 balanced: {:?} adjacent to {:?}",
                        a, b
                    )));
                }
            }
        }

        Ok(Self::build(domain, &leaf_set, depth))
    }

    // A box is covered when it is a leaf or all of its children are covered.
    fn check_cover(
        key: &BoxKey,
        leaf_set: &HashSet<BoxKey>,
        depth: u32,
        covered: &mut usize,
    ) -> Result<(), FmmError> {
        if leaf_set.contains(key) {
            *covered += 1;
            return Ok(());
        }
        if key.level >= depth {
            return Err(FmmError::Failed(format!(
                "leaf cover does not span the domain at {:?}",
                key
            )));
        }
        for child in key.children() {
            Self::check_cover(&child, leaf_set, depth, covered)?;
        }
        Ok(())
    }

    fn build(domain: Domain<T>, leaf_set: &HashSet<BoxKey>, depth: u32) -> Self {
        let mut nodes: Vec<NodeData<T>> = Vec::new();
        let mut key_to_index = HashMap::new();

        nodes.push(NodeData {
            key: BoxKey::root(),
            leaf: leaf_set.contains(&BoxKey::root()),
            ..NodeData::default()
        });
        key_to_index.insert(BoxKey::root(), 0);

        let mut frontier = vec![0usize];
        while let Some(index) = frontier.pop() {
            if nodes[index].leaf {
                continue;
            }
            let key = nodes[index].key;
            let mut children = [0usize; 8];
            for (octant, child_key) in key.children().into_iter().enumerate() {
                let child_index = nodes.len();
                nodes.push(NodeData {
                    key: child_key,
                    parent: Some(index),
                    leaf: leaf_set.contains(&child_key),
                    ..NodeData::default()
                });
                key_to_index.insert(child_key, child_index);
                children[octant] = child_index;
                frontier.push(child_index);
            }
            nodes[index].children = Some(children);
        }

        let mut levels = vec![Vec::new(); depth as usize + 1];
        let mut leaves = Vec::new();
        for (index, node) in nodes.iter().enumerate() {
            levels[node.key.level as usize].push(index);
            if node.leaf {
                leaves.push(index);
            }
        }
        for level in levels.iter_mut() {
            level.sort_by_key(|&index| nodes[index].key);
        }
        leaves.sort_by_key(|&index| nodes[index].key);

        Octree {
            domain,
            depth,
            nodes,
            key_to_index,
            levels,
            leaves,
        }
    }

    /// Number of nodes in the arena.
    pub fn n_nodes(&self) -> usize {
        self.nodes.len()
    }

    /// Node data at an arena index.
    pub fn node(&self, index: usize) -> &NodeData<T> {
        &self.nodes[index]
    }

    /// Arena index of a geometric key, if the node exists.
    pub fn index_of(&self, key: &BoxKey) -> Option<usize> {
        self.key_to_index.get(key).copied()
    }

    /// Arena indices of the nodes at a level, sorted by key.
    pub fn level_nodes(&self, level: u32) -> &[usize] {
        if (level as usize) < self.levels.len() {
            &self.levels[level as usize]
        } else {
            &[]
        }
    }

    /// Attach density coefficients to a node.
    pub fn set_density(&mut self, index: usize, density: Vec<T>) {
        self.nodes[index].density = density;
    }

    /// Mark or unmark a node as a ghost.
    pub fn set_ghost(&mut self, index: usize, ghost: bool) {
        self.nodes[index].ghost = ghost;
    }

    /// Arena indices of all leaves descended from (and including) a node.
    pub fn descendant_leaves(&self, index: usize) -> Vec<usize> {
        let mut result = Vec::new();
        let mut frontier = vec![index];
        while let Some(current) = frontier.pop() {
            if self.nodes[current].leaf {
                result.push(current);
            } else if let Some(children) = self.nodes[current].children {
                frontier.extend(children);
            }
        }
        result
    }
}

#[cfg(test)]
mod test {
    use crate::tree::helpers::refined_octant_leaves;
    use crate::tree::types::{BoxKey, Domain, Octree};

    #[test]
    fn test_uniform_tree_shape() {
        let tree = Octree::<f64>::uniform(Domain::unit(), 2).unwrap();
        assert_eq!(tree.n_nodes(), 1 + 8 + 64);
        assert_eq!(tree.leaves.len(), 64);
        assert_eq!(tree.level_nodes(1).len(), 8);
        assert_eq!(tree.level_nodes(2).len(), 64);

        // Parent/child indices are mutually consistent.
        for &index in tree.level_nodes(2) {
            let parent = tree.node(index).parent.unwrap();
            let children = tree.node(parent).children.unwrap();
            assert!(children.contains(&index));
        }
    }

    #[test]
    fn test_adaptive_tree_shape() {
        let leaves = refined_octant_leaves(2);
        let tree = Octree::<f64>::from_leaves(Domain::unit(), &leaves).unwrap();
        assert_eq!(tree.depth, 3);
        // 64 level 2 leaves, minus the refined one, plus its 8 children.
        assert_eq!(tree.leaves.len(), 63 + 8);
    }

    #[test]
    fn test_incomplete_cover_rejected() {
        let mut leaves = Vec::new();
        for key in BoxKey::root().children() {
            leaves.push(key);
        }
        leaves.pop();
        assert!(Octree::<f64>::from_leaves(Domain::unit(), &leaves).is_err());
    }

    #[test]
    fn test_unbalanced_cover_rejected() {
        // Refine one level 1 box down to level 3 while its neighbours stay
        // at level 1.
        let mut leaves = Vec::new();
        for key in BoxKey::root().children() {
            if key.index == [0, 0, 0] {
                for child in key.children() {
                    if child.index == [0, 0, 0] {
                        leaves.extend(child.children());
                    } else {
                        leaves.push(child);
                    }
                }
            } else {
                leaves.push(key);
            }
        }
        assert!(Octree::<f64>::from_leaves(Domain::unit(), &leaves).is_err());
    }

    #[test]
    fn test_descendant_leaves() {
        let tree = Octree::<f64>::uniform(Domain::unit(), 2).unwrap();
        let child = tree.node(0).children.unwrap()[0];
        assert_eq!(tree.descendant_leaves(child).len(), 8);
        assert_eq!(tree.descendant_leaves(0).len(), 64);
    }
}
