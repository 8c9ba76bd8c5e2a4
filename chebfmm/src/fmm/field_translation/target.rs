//! Local expansion translations and leaf output.
use bytemuck::Pod;
use num::Float;
use rlst::{empty_array, rlst_dynamic_array2, MultIntoResize, RawAccess, RawAccessMut, RlstScalar};

use crate::fmm::collect::{gather_columns, scatter_accumulate};
use crate::fmm::types::ChebFmm;
use crate::traits::fmm::TargetTranslation;
use crate::traits::kernel::KernelMetadata;
use crate::traits::types::FmmError;

impl<Scalar, Kern> TargetTranslation for ChebFmm<Scalar, Kern>
where
    Scalar: RlstScalar<Real = Scalar> + Float + Default + Pod,
    Kern: KernelMetadata<T = Scalar>,
{
    /// Interpolate the locals of every parent above `level` onto the grids
    /// of its children, one batched product per octant. Children keep the
    /// well-separated contributions already accumulated at their own level.
    fn l2l(&mut self, level: u32) -> Result<(), FmmError> {
        if level == 0 {
            return Err(FmmError::Failed(
                "l2l requires a child level below the root".to_string(),
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
            let gathered = gather_columns(&self.locals, n, &parents);
            let product = empty_array::<Scalar, 2>()
                .simple_mult_into_resize(self.l2l[octant].view(), gathered.view());
            scatter_accumulate(product.data(), n, &children, &mut self.locals);
        }
        Ok(())
    }

    /// Convert each non-ghost leaf's local expansion plus directly
    /// accumulated near-field values into output Chebyshev coefficients and
    /// merge them into the tree. A leaf whose output storage disagrees with
    /// the configured order is reinitialised before the write.
    fn evaluate_leaf_output(&mut self) -> Result<(), FmmError> {
        let n = self.n_coeffs;
        let leaves: Vec<usize> = self
            .tree
            .leaves
            .iter()
            .copied()
            .filter(|&leaf| !self.tree.node(leaf).ghost)
            .collect();
        if leaves.is_empty() {
            return Ok(());
        }

        let mut potentials = rlst_dynamic_array2!(Scalar, [n, leaves.len()]);
        for (column, &leaf) in potentials
            .data_mut()
            .chunks_exact_mut(n)
            .zip(leaves.iter())
        {
            for (out, (&local, &direct)) in column.iter_mut().zip(
                self.locals[leaf * n..(leaf + 1) * n]
                    .iter()
                    .zip(self.direct[leaf * n..(leaf + 1) * n].iter()),
            ) {
                *out = local + direct;
            }
        }
        let coefficients = empty_array::<Scalar, 2>()
            .simple_mult_into_resize(self.cheb.analysis.view(), potentials.view());

        for (column, &leaf) in coefficients.data().chunks_exact(n).zip(leaves.iter()) {
            let field = &mut self.tree.nodes[leaf].field;
            if field.len() != n {
                if !field.is_empty() {
                    log::debug!(
                        "reinitialising output of leaf {}: {}",
                        leaf,
                        FmmError::DimensionMismatch {
                            node: leaf,
                            expected: n,
                            found: field.len(),
                        }
                    );
                }
                *field = vec![Scalar::zero(); n];
            }
            field.copy_from_slice(column);
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
    use crate::traits::fmm::TargetTranslation;
    use crate::tree::types::{Domain, Octree};

    #[test]
    fn test_l2l_reproduces_smooth_fields() {
        // A polynomial field sampled on the root grid interpolates exactly
        // onto every leaf grid.
        let order = 4;
        let tree = Octree::<f64>::uniform(Domain::unit(), 2).unwrap();
        let mut fmm = ChebFmmBuilder::new()
            .tree(tree)
            .parameters(order, Laplace3dKernel::new())
            .build()
            .unwrap();
        let n = fmm.n_coeffs;

        let poly = |p: [f64; 3]| 0.5 + p[0] - p[1] * p[2] + p[0] * p[0] * p[1];
        let domain = fmm.tree.domain;
        let grid = |node: usize, fmm: &crate::fmm::types::ChebFmm<f64, Laplace3dKernel<f64>>| {
            let key = fmm.tree.node(node).key;
            fmm.cheb.grid_points(key.centre(&domain), key.side_length(&domain))
        };

        let root_grid = grid(0, &fmm);
        for m in 0..n {
            fmm.locals[m] = poly([root_grid[3 * m], root_grid[3 * m + 1], root_grid[3 * m + 2]]);
        }
        fmm.l2l(1).unwrap();
        fmm.l2l(2).unwrap();

        for &leaf in &fmm.tree.leaves {
            let points = grid(leaf, &fmm);
            for m in 0..n {
                let expected =
                    poly([points[3 * m], points[3 * m + 1], points[3 * m + 2]]);
                assert_relative_eq!(fmm.locals[leaf * n + m], expected, epsilon = 1e-11);
            }
        }
    }

    #[test]
    fn test_leaf_output_skips_ghosts_and_reinitialises_stale_storage() {
        let order = 2;
        let tree = Octree::<f64>::uniform(Domain::unit(), 1).unwrap();
        let mut fmm = ChebFmmBuilder::new()
            .tree(tree)
            .parameters(order, Laplace3dKernel::new())
            .build()
            .unwrap();
        let n = fmm.n_coeffs;
        let leaves = fmm.tree.leaves.clone();

        fmm.tree.set_ghost(leaves[0], true);
        fmm.tree.nodes[leaves[0]].field = vec![7.0; 2];
        fmm.tree.nodes[leaves[1]].field = vec![7.0; n + 5];
        for &leaf in &leaves {
            for m in 0..n {
                fmm.locals[leaf * n + m] = 1.0;
                fmm.direct[leaf * n + m] = 2.0;
            }
        }
        fmm.evaluate_leaf_output().unwrap();

        // Ghost output untouched, stale storage reinitialised to order size.
        assert_eq!(fmm.tree.node(leaves[0]).field, vec![7.0; 2]);
        assert_eq!(fmm.tree.node(leaves[1]).field.len(), n);

        // Constant grid values analyse to a constant-only expansion.
        let field = &fmm.tree.node(leaves[1]).field;
        assert_relative_eq!(field[0], 3.0, epsilon = 1e-12);
        for &coeff in &field[1..] {
            assert_relative_eq!(coeff, 0.0, epsilon = 1e-12);
        }
    }
}
