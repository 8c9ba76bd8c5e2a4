//! Geometric operations on box keys.
use itertools::iproduct;
use num::Float;
use rlst::RlstScalar;

use crate::tree::types::{BoxKey, Domain};

impl BoxKey {
    /// The root box at level 0.
    pub fn root() -> Self {
        BoxKey {
            level: 0,
            index: [0, 0, 0],
        }
    }

    /// Construct a key, debug-checking the coordinate bounds.
    pub fn new(level: u32, index: [u32; 3]) -> Self {
        debug_assert!(index.iter().all(|&i| (i as u64) < (1u64 << level)));
        BoxKey { level, index }
    }

    /// Parent key; the root is its own parent.
    pub fn parent(&self) -> Self {
        if self.level == 0 {
            return *self;
        }
        BoxKey {
            level: self.level - 1,
            index: [self.index[0] / 2, self.index[1] / 2, self.index[2] / 2],
        }
    }

    /// The octant this key occupies within its parent, in `0..8`.
    pub fn octant(&self) -> usize {
        ((self.index[0] & 1) | ((self.index[1] & 1) << 1) | ((self.index[2] & 1) << 2)) as usize
    }

    /// The eight children in octant order.
    pub fn children(&self) -> Vec<BoxKey> {
        let mut children = Vec::with_capacity(8);
        for octant in 0..8u32 {
            children.push(BoxKey {
                level: self.level + 1,
                index: [
                    2 * self.index[0] + (octant & 1),
                    2 * self.index[1] + ((octant >> 1) & 1),
                    2 * self.index[2] + ((octant >> 2) & 1),
                ],
            });
        }
        children
    }

    /// All keys sharing this key's parent, in octant order, self included.
    pub fn siblings(&self) -> Vec<BoxKey> {
        self.parent().children()
    }

    /// Shift this key by a grid offset at its own level, `None` when the
    /// result leaves the domain.
    pub fn shifted(&self, offset: [i64; 3]) -> Option<BoxKey> {
        let bound = 1i64 << self.level;
        let mut index = [0u32; 3];
        for d in 0..3 {
            let i = self.index[d] as i64 + offset[d];
            if i < 0 || i >= bound {
                return None;
            }
            index[d] = i as u32;
        }
        Some(BoxKey {
            level: self.level,
            index,
        })
    }

    /// The up to 26 same-level neighbours of this key that lie inside the
    /// domain.
    pub fn neighbors(&self) -> Vec<BoxKey> {
        let mut neighbors = Vec::with_capacity(26);
        for (i, j, k) in iproduct!(-1..=1i64, -1..=1i64, -1..=1i64) {
            if i == 0 && j == 0 && k == 0 {
                continue;
            }
            if let Some(neighbor) = self.shifted([i, j, k]) {
                neighbors.push(neighbor);
            }
        }
        neighbors
    }

    /// Whether this key is a strict ancestor of `other`.
    pub fn is_ancestor_of(&self, other: &BoxKey) -> bool {
        if other.level <= self.level {
            return false;
        }
        let shift = other.level - self.level;
        (0..3).all(|d| (other.index[d] >> shift) == self.index[d])
    }

    /// Whether the closed cubes of two keys intersect. For keys describing
    /// disjoint boxes this is the adjacency predicate of the near field;
    /// it also holds for a key and any of its ancestors.
    pub fn is_adjacent(&self, other: &BoxKey) -> bool {
        let level = self.level.max(other.level);
        let ls = level - self.level;
        let lo = level - other.level;
        (0..3).all(|d| {
            let self_min = (self.index[d] as u64) << ls;
            let self_max = ((self.index[d] as u64) + 1) << ls;
            let other_min = (other.index[d] as u64) << lo;
            let other_max = ((other.index[d] as u64) + 1) << lo;
            self_min <= other_max && other_min <= self_max
        })
    }

    /// Physical side length of this box within a domain.
    pub fn side_length<T: RlstScalar<Real = T> + Float>(&self, domain: &Domain<T>) -> T {
        let cells = T::from(1u64 << self.level).unwrap();
        domain.side_length[0] / cells
    }

    /// Physical centre of this box within a domain.
    pub fn centre<T: RlstScalar<Real = T> + Float>(&self, domain: &Domain<T>) -> [T; 3] {
        let side = self.side_length(domain);
        let half = T::from(0.5).unwrap();
        let mut centre = [T::zero(); 3];
        for d in 0..3 {
            centre[d] = domain.origin[d] + side * (T::from(self.index[d]).unwrap() + half);
        }
        centre
    }
}

impl<T> Domain<T>
where
    T: RlstScalar<Real = T> + Float,
{
    /// A cubic domain from an origin corner and a side length.
    pub fn cube(origin: [T; 3], side_length: T) -> Self {
        Domain {
            origin,
            side_length: [side_length; 3],
        }
    }

    /// The unit cube.
    pub fn unit() -> Self {
        Domain::cube([T::zero(); 3], T::one())
    }
}

#[cfg(test)]
mod test {
    use crate::tree::types::{BoxKey, Domain};

    #[test]
    fn test_parent_child_round_trip() {
        let key = BoxKey::new(3, [5, 2, 7]);
        for child in key.children() {
            assert_eq!(child.parent(), key);
        }
        assert_eq!(key.children()[key.children()[3].octant()], key.children()[3]);
    }

    #[test]
    fn test_neighbors() {
        let interior = BoxKey::new(2, [1, 1, 1]);
        assert_eq!(interior.neighbors().len(), 26);

        let corner = BoxKey::new(2, [0, 0, 0]);
        assert_eq!(corner.neighbors().len(), 7);

        let root = BoxKey::root();
        assert!(root.neighbors().is_empty());
    }

    #[test]
    fn test_adjacency_same_level() {
        let a = BoxKey::new(2, [1, 1, 1]);
        assert!(a.is_adjacent(&BoxKey::new(2, [2, 2, 2])));
        assert!(a.is_adjacent(&a));
        assert!(!a.is_adjacent(&BoxKey::new(2, [3, 1, 1])));
    }

    #[test]
    fn test_adjacency_across_levels() {
        // A level 1 box and a level 2 box sharing a face.
        let coarse = BoxKey::new(1, [0, 0, 0]);
        let fine = BoxKey::new(2, [2, 0, 0]);
        assert!(coarse.is_adjacent(&fine));

        // Separated by one fine box.
        let distant = BoxKey::new(2, [3, 0, 0]);
        assert!(!coarse.is_adjacent(&distant));
    }

    #[test]
    fn test_ancestry() {
        let key = BoxKey::new(3, [5, 2, 7]);
        assert!(BoxKey::root().is_ancestor_of(&key));
        assert!(key.parent().is_ancestor_of(&key));
        assert!(!key.is_ancestor_of(&key));
        assert!(!key.is_ancestor_of(&key.parent()));
    }

    #[test]
    fn test_centre_and_side() {
        let domain = Domain::<f64>::cube([0.0, 0.0, 0.0], 8.0);
        let key = BoxKey::new(2, [3, 0, 1]);
        assert_eq!(key.side_length(&domain), 2.0);
        assert_eq!(key.centre(&domain), [7.0, 1.0, 3.0]);
    }
}
