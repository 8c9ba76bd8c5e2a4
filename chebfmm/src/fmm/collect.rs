//! Gather/scatter between per-node scratch buffers and contiguous matrices.
//!
//! Engine scratch is flat, `n_coeffs` entries per arena node. The batched
//! backend gathers the vectors of a configuration group into one
//! column-major matrix, multiplies once, and scatters the product back with
//! accumulation. The row order of the gathered matrix is the caller's node
//! order, which the scatter step relies on.
use num::Float;
use rlst::{rlst_dynamic_array2, RawAccessMut, RlstScalar};

use crate::fmm::types::Matrix2;

/// Gather the `n_coeffs` vectors of `nodes` from a flat scratch buffer into
/// an `[n_coeffs, nodes.len()]` matrix, one column per node.
pub fn gather_columns<T>(scratch: &[T], n_coeffs: usize, nodes: &[usize]) -> Matrix2<T>
where
    T: RlstScalar<Real = T> + Float,
{
    let mut gathered = rlst_dynamic_array2!(T, [n_coeffs, nodes.len()]);
    for (column, &node) in gathered
        .data_mut()
        .chunks_exact_mut(n_coeffs)
        .zip(nodes.iter())
    {
        column.copy_from_slice(&scratch[node * n_coeffs..(node + 1) * n_coeffs]);
    }
    gathered
}

/// Accumulate the columns of a product, in the same node order the gather
/// used, into a flat scratch buffer.
pub fn scatter_accumulate<T>(product: &[T], n_coeffs: usize, nodes: &[usize], scratch: &mut [T])
where
    T: RlstScalar<Real = T> + Float,
{
    for (column, &node) in product.chunks_exact(n_coeffs).zip(nodes.iter()) {
        let target = &mut scratch[node * n_coeffs..(node + 1) * n_coeffs];
        for (accumulated, &value) in target.iter_mut().zip(column.iter()) {
            *accumulated = *accumulated + value;
        }
    }
}

#[cfg(test)]
mod test {
    use rlst::RawAccess;

    use super::*;

    #[test]
    fn test_gather_preserves_node_order() {
        let n_coeffs = 2;
        let scratch: Vec<f64> = (0..8).map(|i| i as f64).collect();
        let gathered = gather_columns(&scratch, n_coeffs, &[3, 1]);
        assert_eq!(gathered.data(), &[6.0, 7.0, 2.0, 3.0]);
    }

    #[test]
    fn test_scatter_accumulates_repeated_targets() {
        let n_coeffs = 2;
        let mut scratch = vec![1.0f64; 6];
        // Two columns landing on the same node accumulate.
        scatter_accumulate(&[1.0, 2.0, 10.0, 20.0], n_coeffs, &[2, 2], &mut scratch);
        assert_eq!(scratch, vec![1.0, 1.0, 1.0, 1.0, 12.0, 23.0]);
    }
}
