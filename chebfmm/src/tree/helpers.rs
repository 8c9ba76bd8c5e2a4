//! Fixtures for tests and examples.
use num::Float;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rlst::RlstScalar;

use crate::tree::types::BoxKey;

/// A uniform leaf cover at `level` with the origin box refined one further
/// level. Remains 2:1 balanced, so it is the smallest adaptive fixture that
/// exercises the cross-level interaction lists.
pub fn refined_octant_leaves(level: u32) -> Vec<BoxKey> {
    let cells = 1u32 << level;
    let mut leaves = Vec::new();
    for i in 0..cells {
        for j in 0..cells {
            for k in 0..cells {
                let key = BoxKey::new(level, [i, j, k]);
                if key.index == [0, 0, 0] {
                    leaves.extend(key.children());
                } else {
                    leaves.push(key);
                }
            }
        }
    }
    leaves
}

/// Density coefficients of the constant unit density.
pub fn uniform_density<T: RlstScalar<Real = T> + Float>(n_coeffs: usize) -> Vec<T> {
    let mut density = vec![T::zero(); n_coeffs];
    density[0] = T::one();
    density
}

/// Reproducible random density coefficients in `[-1, 1]`.
pub fn random_density<T: RlstScalar<Real = T> + Float>(n_coeffs: usize, seed: u64) -> Vec<T> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..n_coeffs)
        .map(|_| T::from(rng.gen_range(-1.0..1.0)).unwrap())
        .collect()
}
