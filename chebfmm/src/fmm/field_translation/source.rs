//! Multipole initialisation and child to parent translation.
use bytemuck::Pod;
use num::Float;
use rayon::prelude::*;
use rlst::{
    empty_array, rlst_dynamic_array2, MultIntoResize, RawAccess, RawAccessMut, RlstScalar,
};

use crate::fmm::collect::{gather_columns, scatter_accumulate};
use crate::fmm::types::{ChebFmm, SendPtrMut};
use crate::traits::fmm::SourceTranslation;
use crate::traits::kernel::KernelMetadata;
use crate::traits::types::FmmError;

impl<Scalar, Kern> SourceTranslation for ChebFmm<Scalar, Kern>
where
    Scalar: RlstScalar<Real = Scalar> + Float + Default + Pod,
    Kern: KernelMetadata<T = Scalar>,
{
    /// Discretize each non-ghost source leaf's density into equivalent point
    /// charges at its own grid: grid value times tensor quadrature weight
    /// times the cell volume Jacobian `(side/2)^3`. Overwrites, so repeated
    /// calls are idempotent. Leaves whose stored density disagrees with the
    /// configured order have their density storage reset and contribute
    /// nothing; empty leaves are valid and contribute nothing.
    fn init_multipoles(&mut self) -> Result<(), FmmError> {
        let n = self.n_coeffs;
        self.multipoles.fill(Scalar::zero());

        let mut invalid = Vec::new();
        let mut active = Vec::new();
        for &leaf in &self.tree.leaves {
            let node = self.tree.node(leaf);
            if node.ghost {
                continue;
            }
            match node.density.len() {
                0 => {}
                len if len == n => active.push(leaf),
                len => invalid.push((leaf, len)),
            }
        }
        for (leaf, found) in invalid {
            log::warn!(
                "resetting density of leaf {}: {}",
                leaf,
                FmmError::DimensionMismatch {
                    node: leaf,
                    expected: n,
                    found,
                }
            );
            self.tree.set_density(leaf, Vec::new());
        }
        if active.is_empty() {
            return Ok(());
        }

        let mut densities = rlst_dynamic_array2!(Scalar, [n, active.len()]);
        for (column, &leaf) in densities
            .data_mut()
            .chunks_exact_mut(n)
            .zip(active.iter())
        {
            column.copy_from_slice(&self.tree.node(leaf).density);
        }
        let values = empty_array::<Scalar, 2>()
            .simple_mult_into_resize(self.cheb.synthesis.view(), densities.view());

        let half = Scalar::from(0.5).unwrap();
        let multipole_ptr = SendPtrMut {
            raw: self.multipoles.as_mut_ptr(),
        };
        let tree = &self.tree;
        let cheb = &self.cheb;
        active
            .par_iter()
            .zip(values.data().par_chunks_exact(n))
            // Move the whole SendPtrMut in; capturing the raw field alone
            // would not be Sync.
            .for_each(move |(&leaf, column)| {
                let multipole_ptr = multipole_ptr;
                let side = tree.node(leaf).key.side_length(&tree.domain);
                let jacobian = Float::powi(side * half, 3);
                // Leaves own disjoint slices of the multipole buffer.
                let multipole = unsafe {
                    std::slice::from_raw_parts_mut(multipole_ptr.raw.add(leaf * n), n)
                };
                for ((charge, &weight), &value) in multipole
                    .iter_mut()
                    .zip(cheb.weights.iter())
                    .zip(column.iter())
                {
                    *charge = value * weight * jacobian;
                }
            });
        Ok(())
    }

    /// Anterpolate the equivalent charges of every box at `level` onto its
    /// parent's grid, one batched product per octant.
    fn m2m(&mut self, level: u32) -> Result<(), FmmError> {
        if level == 0 {
            return Err(FmmError::Failed(
                "m2m requires a child level below the root".to_string(),
            ));
        }
        let n = self.n_coeffs;
        let parents: Vec<usize> = self
            .tree
            .level_nodes(level - 1)
            .iter()
            .copied()
            .filter(|&parent| self.tree.node(parent).children.is_some())
            .collect();
        if parents.is_empty() {
            return Ok(());
        }

        for octant in 0..8 {
            let children: Vec<usize> = parents
                .iter()
                .map(|&parent| self.tree.node(parent).children.unwrap()[octant])
                .collect();
            let gathered = gather_columns(&self.multipoles, n, &children);
            let product = empty_array::<Scalar, 2>()
                .simple_mult_into_resize(self.m2m[octant].view(), gathered.view());
            scatter_accumulate(product.data(), n, &parents, &mut self.multipoles);
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    extern crate blas_src;
    extern crate lapack_src;

    use approx::assert_relative_eq;
    use green_kernels::laplace_3d::Laplace3dKernel;

    use crate::fmm::builder::ChebFmmBuilder;
    use crate::traits::fmm::SourceTranslation;
    use crate::tree::helpers::{random_density, uniform_density};
    use crate::tree::types::{Domain, Octree};

    #[test]
    fn test_init_multipoles_unit_density() {
        let order = 3;
        let tree = Octree::<f64>::uniform(Domain::unit(), 1).unwrap();
        let mut fmm = ChebFmmBuilder::new()
            .tree(tree)
            .parameters(order, Laplace3dKernel::new())
            .build()
            .unwrap();
        let n = fmm.n_coeffs;
        for leaf in fmm.tree.leaves.clone() {
            fmm.tree.set_density(leaf, uniform_density(n));
        }
        fmm.init_multipoles().unwrap();

        // A unit density integrates to the leaf volume.
        let leaf = fmm.tree.leaves[0];
        let total: f64 = fmm.multipoles[leaf * n..(leaf + 1) * n].iter().sum();
        assert_relative_eq!(total, 0.125, epsilon = 1e-12);
    }

    #[test]
    fn test_init_multipoles_is_idempotent_and_resets_bad_densities() {
        let order = 2;
        let tree = Octree::<f64>::uniform(Domain::unit(), 1).unwrap();
        let mut fmm = ChebFmmBuilder::new()
            .tree(tree)
            .parameters(order, Laplace3dKernel::new())
            .build()
            .unwrap();
        let n = fmm.n_coeffs;
        let leaves = fmm.tree.leaves.clone();
        fmm.tree.set_density(leaves[0], random_density(n, 1));
        fmm.tree.set_density(leaves[1], vec![1.0; n + 3]);

        fmm.init_multipoles().unwrap();
        let first = fmm.multipoles.clone();

        // The malformed density was reset, its leaf contributes nothing.
        assert!(fmm.tree.node(leaves[1]).density.is_empty());
        assert!(first[leaves[1] * n..(leaves[1] + 1) * n]
            .iter()
            .all(|&v| v == 0.0));

        fmm.init_multipoles().unwrap();
        assert_eq!(first, fmm.multipoles);
    }

    #[test]
    fn test_m2m_conserves_total_charge() {
        // Anterpolation preserves the total of the equivalent charges: the
        // interpolation weights of each child point sum to one over the
        // parent grid.
        let order = 4;
        let tree = Octree::<f64>::uniform(Domain::unit(), 2).unwrap();
        let mut fmm = ChebFmmBuilder::new()
            .tree(tree)
            .parameters(order, Laplace3dKernel::new())
            .build()
            .unwrap();
        let n = fmm.n_coeffs;
        for (i, leaf) in fmm.tree.leaves.clone().into_iter().enumerate() {
            fmm.tree.set_density(leaf, random_density(n, i as u64));
        }
        fmm.init_multipoles().unwrap();

        let leaf_total: f64 = fmm
            .tree
            .leaves
            .clone()
            .iter()
            .flat_map(|&leaf| fmm.multipoles[leaf * n..(leaf + 1) * n].to_vec())
            .sum();

        fmm.m2m(2).unwrap();
        fmm.m2m(1).unwrap();
        let root_total: f64 = fmm.multipoles[..n].iter().sum();
        assert_relative_eq!(root_total, leaf_total, epsilon = 1e-10);
    }
}
