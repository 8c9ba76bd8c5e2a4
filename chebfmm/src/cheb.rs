//! Chebyshev grids, tensor-product transforms, and interpolation maps.
//!
//! All boxes share a single reference cube `[-1, 1]^3` carrying the
//! tensor-product grid of first-kind Chebyshev roots. Densities and
//! potentials live as coefficient vectors in the tensor Chebyshev basis,
//! with the x index varying fastest in both grid and coefficient order;
//! the matrices assembled here move data between coefficients, grid
//! values, and the grids of parent and child boxes.
use num::Float;
use rlst::{rlst_dynamic_array2, RawAccess, RawAccessMut, RlstScalar, Shape};

use crate::fmm::types::Matrix2;

/// The roots of the degree `order` Chebyshev polynomial of the first kind,
/// `cos((2i + 1) pi / 2 order)`, in decreasing order.
pub fn cheb_nodes<T: RlstScalar<Real = T> + Float>(order: usize) -> Vec<T> {
    let n = T::from(order).unwrap();
    (0..order)
        .map(|i| {
            let angle = T::from(std::f64::consts::PI).unwrap()
                * (T::from(2 * i + 1).unwrap() / (T::from(2.0).unwrap() * n));
            Float::cos(angle)
        })
        .collect()
}

/// Fejer's first quadrature rule on the Chebyshev roots, exact for
/// polynomials of degree below `order` and summing to 2.
pub fn fejer_weights<T: RlstScalar<Real = T> + Float>(order: usize) -> Vec<T> {
    let n = T::from(order).unwrap();
    let two = T::from(2.0).unwrap();
    (0..order)
        .map(|i| {
            let theta = T::from(std::f64::consts::PI).unwrap() * T::from(2 * i + 1).unwrap()
                / (two * n);
            let mut sum = T::zero();
            for m in 1..=(order / 2) {
                let m_t = T::from(m).unwrap();
                sum = sum + Float::cos(two * m_t * theta)
                    / (T::from(4.0).unwrap() * m_t * m_t - T::one());
            }
            (two / n) * (T::one() - two * sum)
        })
        .collect()
}

/// Values `T_0(x) .. T_{order - 1}(x)` by the three-term recurrence.
pub fn cheb_polynomials<T: RlstScalar<Real = T> + Float>(order: usize, x: T) -> Vec<T> {
    let mut values = Vec::with_capacity(order);
    values.push(T::one());
    if order > 1 {
        values.push(x);
    }
    for k in 2..order {
        let next = T::from(2.0).unwrap() * x * values[k - 1] - values[k - 2];
        values.push(next);
    }
    values
}

/// Precomputed Chebyshev transform matrices for one truncation order,
/// shared by every box in the tree.
pub struct ChebTransforms<T>
where
    T: RlstScalar<Real = T> + Float,
{
    /// Truncation order per axis.
    pub order: usize,

    /// Coefficients and grid points per box, `order^3`.
    pub n_coeffs: usize,

    /// One-dimensional grid nodes.
    pub nodes: Vec<T>,

    /// Fejer quadrature weights of the tensor grid, grid order.
    pub weights: Vec<T>,

    /// Synthesis matrix taking tensor coefficients to grid values,
    /// `[n_coeffs, n_coeffs]`.
    pub synthesis: Matrix2<T>,

    /// Analysis matrix taking grid values to tensor coefficients, the
    /// exact inverse of `synthesis` by discrete orthogonality.
    pub analysis: Matrix2<T>,

    // 1D interpolation maps from the parent grid to the child grids of
    // the lower and upper half interval, `[order, order]` each.
    child_interp: [Matrix2<T>; 2],
}

impl<T> ChebTransforms<T>
where
    T: RlstScalar<Real = T> + Float,
{
    /// Assemble all transform matrices for one truncation order.
    pub fn new(order: usize) -> Self {
        let n_coeffs = order * order * order;
        let nodes = cheb_nodes::<T>(order);
        let weights1 = fejer_weights::<T>(order);

        let mut weights = Vec::with_capacity(n_coeffs);
        for k in 0..order {
            for j in 0..order {
                for i in 0..order {
                    weights.push(weights1[i] * weights1[j] * weights1[k]);
                }
            }
        }

        // 1D basis values at the nodes, node index fastest.
        let mut basis = vec![T::zero(); order * order];
        for (i, &node) in nodes.iter().enumerate() {
            for (degree, &value) in cheb_polynomials(order, node).iter().enumerate() {
                basis[i + order * degree] = value;
            }
        }

        let mut synthesis = rlst_dynamic_array2!(T, [n_coeffs, n_coeffs]);
        let mut analysis = rlst_dynamic_array2!(T, [n_coeffs, n_coeffs]);
        {
            let n = T::from(order).unwrap();
            let synthesis_data = synthesis.data_mut();
            for q in 0..n_coeffs {
                let (a, b, c) = (q % order, (q / order) % order, q / (order * order));
                for m in 0..n_coeffs {
                    let (i, j, k) = (m % order, (m / order) % order, m / (order * order));
                    synthesis_data[m + n_coeffs * q] =
                        basis[i + order * a] * basis[j + order * b] * basis[k + order * c];
                }
            }
            // Discrete orthogonality of the first-kind roots gives the
            // inverse analytically, scaled by 2/n per non-constant degree.
            let analysis_data = analysis.data_mut();
            for m in 0..n_coeffs {
                let (i, j, k) = (m % order, (m / order) % order, m / (order * order));
                for q in 0..n_coeffs {
                    let (a, b, c) = (q % order, (q / order) % order, q / (order * order));
                    let mut scale = T::one() / (n * n * n);
                    for degree in [a, b, c] {
                        if degree > 0 {
                            scale = scale * T::from(2.0).unwrap();
                        }
                    }
                    analysis_data[q + n_coeffs * m] =
                        scale * basis[i + order * a] * basis[j + order * b] * basis[k + order * c];
                }
            }
        }

        // Child grids in parent coordinates sit at `0.5 t +- 0.5`.
        let half = T::from(0.5).unwrap();
        let child_interp = [-half, half].map(|shift| {
            let mut map = rlst_dynamic_array2!(T, [order, order]);
            let map_data = map.data_mut();
            for (j, &node) in nodes.iter().enumerate() {
                let row = interp_weights(order, &nodes, half * node + shift);
                for (i, &weight) in row.iter().enumerate() {
                    map_data[i + order * j] = weight;
                }
            }
            map
        });

        ChebTransforms {
            order,
            n_coeffs,
            nodes,
            weights,
            synthesis,
            analysis,
            child_interp,
        }
    }

    /// The tensor grid of a box with the given centre and side length, as
    /// interleaved `[x, y, z]` triples in grid order.
    pub fn grid_points(&self, centre: [T; 3], side_length: T) -> Vec<T> {
        let half_side = side_length * T::from(0.5).unwrap();
        let mut points = Vec::with_capacity(3 * self.n_coeffs);
        for k in 0..self.order {
            for j in 0..self.order {
                for i in 0..self.order {
                    points.push(centre[0] + half_side * self.nodes[i]);
                    points.push(centre[1] + half_side * self.nodes[j]);
                    points.push(centre[2] + half_side * self.nodes[k]);
                }
            }
        }
        points
    }

    /// Evaluate a tensor coefficient vector at a point of the reference
    /// cube.
    pub fn evaluate_coeffs(&self, coeffs: &[T], point: [T; 3]) -> T {
        let px = cheb_polynomials(self.order, point[0]);
        let py = cheb_polynomials(self.order, point[1]);
        let pz = cheb_polynomials(self.order, point[2]);
        let mut value = T::zero();
        for (q, &coeff) in coeffs.iter().enumerate() {
            let (a, b, c) = (
                q % self.order,
                (q / self.order) % self.order,
                q / (self.order * self.order),
            );
            value = value + coeff * px[a] * py[b] * pz[c];
        }
        value
    }

    /// The child to parent multipole map of one octant, `[n_coeffs,
    /// n_coeffs]`: its transpose against the parent grid anterpolates the
    /// child's equivalent charges onto the parent grid.
    ///
    /// Entry `(m, j)` is the interpolation weight of parent node `m` at
    /// child node `j` mapped into parent coordinates.
    pub fn child_to_parent(&self, octant: usize) -> Matrix2<T> {
        let order = self.order;
        let cx = &self.child_interp[octant & 1];
        let cy = &self.child_interp[(octant >> 1) & 1];
        let cz = &self.child_interp[(octant >> 2) & 1];
        let mut map = rlst_dynamic_array2!(T, [self.n_coeffs, self.n_coeffs]);
        let map_data = map.data_mut();
        for j in 0..self.n_coeffs {
            let (jx, jy, jz) = (j % order, (j / order) % order, j / (order * order));
            for m in 0..self.n_coeffs {
                let (mx, my, mz) = (m % order, (m / order) % order, m / (order * order));
                map_data[m + self.n_coeffs * j] = cx.data()[mx + order * jx]
                    * cy.data()[my + order * jy]
                    * cz.data()[mz + order * jz];
            }
        }
        map
    }

    /// The parent to child local map of one octant, the transpose of
    /// [`Self::child_to_parent`]: it interpolates parent grid values at the
    /// child's grid.
    pub fn parent_to_child(&self, octant: usize) -> Matrix2<T> {
        let upward = self.child_to_parent(octant);
        let mut map = rlst_dynamic_array2!(T, [self.n_coeffs, self.n_coeffs]);
        let [rows, cols] = upward.shape();
        let map_data = map.data_mut();
        for col in 0..cols {
            for row in 0..rows {
                map_data[col + cols * row] = upward.data()[row + rows * col];
            }
        }
        map
    }
}

/// Interpolation weights from the Chebyshev root grid to a point, via the
/// discrete reproducing kernel `1/n + (2/n) sum_k T_k(x) T_k(t_i)`.
pub fn interp_weights<T: RlstScalar<Real = T> + Float>(order: usize, nodes: &[T], x: T) -> Vec<T> {
    let n = T::from(order).unwrap();
    let two = T::from(2.0).unwrap();
    let at_x = cheb_polynomials(order, x);
    nodes
        .iter()
        .map(|&node| {
            let at_node = cheb_polynomials(order, node);
            let mut weight = T::one() / n;
            for k in 1..order {
                weight = weight + (two / n) * at_x[k] * at_node[k];
            }
            weight
        })
        .collect()
}

#[cfg(test)]
mod test {
    use approx::assert_relative_eq;
    use rlst::RawAccess;

    use super::*;
    use crate::tree::helpers::random_density;

    #[test]
    fn test_nodes_symmetric_and_decreasing() {
        let nodes = cheb_nodes::<f64>(7);
        for i in 0..7 {
            assert_relative_eq!(nodes[i], -nodes[6 - i], epsilon = 1e-14);
            if i > 0 {
                assert!(nodes[i] < nodes[i - 1]);
            }
        }
    }

    #[test]
    fn test_fejer_weights() {
        for order in [1, 2, 5, 8] {
            let weights = fejer_weights::<f64>(order);
            assert!(weights.iter().all(|&w| w > 0.0));
            let total: f64 = weights.iter().sum();
            assert_relative_eq!(total, 2.0, epsilon = 1e-13);
        }

        // Exactness on x^2 over [-1, 1].
        let nodes = cheb_nodes::<f64>(4);
        let weights = fejer_weights::<f64>(4);
        let integral: f64 = nodes
            .iter()
            .zip(weights.iter())
            .map(|(&t, &w)| w * t * t)
            .sum();
        assert_relative_eq!(integral, 2.0 / 3.0, epsilon = 1e-13);
    }

    #[test]
    fn test_analysis_inverts_synthesis() {
        let cheb = ChebTransforms::<f64>::new(4);
        let coeffs = random_density::<f64>(cheb.n_coeffs, 7);

        // coeffs -> grid values -> coeffs.
        let n = cheb.n_coeffs;
        let mut values = vec![0.0; n];
        for q in 0..n {
            for m in 0..n {
                values[m] += cheb.synthesis.data()[m + n * q] * coeffs[q];
            }
        }
        let mut recovered = vec![0.0; n];
        for m in 0..n {
            for q in 0..n {
                recovered[q] += cheb.analysis.data()[q + n * m] * values[m];
            }
        }
        for (recovered, original) in recovered.iter().zip(coeffs.iter()) {
            assert_relative_eq!(recovered, original, epsilon = 1e-12);
        }
    }

    #[test]
    fn test_synthesis_matches_pointwise_evaluation() {
        let cheb = ChebTransforms::<f64>::new(3);
        let coeffs = random_density::<f64>(cheb.n_coeffs, 11);
        let n = cheb.n_coeffs;
        for m in 0..n {
            let (i, j, k) = (m % 3, (m / 3) % 3, m / 9);
            let point = [cheb.nodes[i], cheb.nodes[j], cheb.nodes[k]];
            let mut from_matrix = 0.0;
            for q in 0..n {
                from_matrix += cheb.synthesis.data()[m + n * q] * coeffs[q];
            }
            assert_relative_eq!(
                from_matrix,
                cheb.evaluate_coeffs(&coeffs, point),
                epsilon = 1e-13
            );
        }
    }

    #[test]
    fn test_interp_weights_reproduce_polynomials() {
        let order = 6;
        let nodes = cheb_nodes::<f64>(order);
        // A degree 4 polynomial is reproduced exactly at any point.
        let poly = |x: f64| 1.0 - 2.0 * x + 0.5 * x.powi(3) + 0.25 * x.powi(4);
        for &x in &[-0.9, -0.3, 0.0, 0.41, 0.99] {
            let weights = interp_weights(order, &nodes, x);
            let interpolated: f64 = weights
                .iter()
                .zip(nodes.iter())
                .map(|(&w, &t)| w * poly(t))
                .sum();
            assert_relative_eq!(interpolated, poly(x), epsilon = 1e-12);
        }
    }

    #[test]
    fn test_parent_to_child_transposes_child_to_parent() {
        let cheb = ChebTransforms::<f64>::new(3);
        let n = cheb.n_coeffs;
        for octant in 0..8 {
            let up = cheb.child_to_parent(octant);
            let down = cheb.parent_to_child(octant);
            for col in 0..n {
                for row in 0..n {
                    assert_eq!(up.data()[row + n * col], down.data()[col + n * row]);
                }
            }
        }
    }

    #[test]
    fn test_parent_to_child_interpolates_smooth_grid_data() {
        // Values of a low-degree polynomial on the parent grid, pushed to a
        // child grid, match direct evaluation there.
        let cheb = ChebTransforms::<f64>::new(5);
        let n = cheb.n_coeffs;
        let poly = |p: [f64; 3]| 1.0 + p[0] * p[1] - 0.5 * p[2] * p[2] + p[0] * p[0] * p[2];

        let mut parent_values = vec![0.0; n];
        for m in 0..n {
            let (i, j, k) = (m % 5, (m / 5) % 5, m / 25);
            parent_values[m] = poly([cheb.nodes[i], cheb.nodes[j], cheb.nodes[k]]);
        }

        for octant in [0usize, 5] {
            let down = cheb.parent_to_child(octant);
            let mut child_values = vec![0.0; n];
            for col in 0..n {
                for row in 0..n {
                    child_values[row] += down.data()[row + n * col] * parent_values[col];
                }
            }
            let shift = |bit: usize| if bit == 1 { 0.5 } else { -0.5 };
            for j in 0..n {
                let (jx, jy, jz) = (j % 5, (j / 5) % 5, j / 25);
                let point = [
                    0.5 * cheb.nodes[jx] + shift(octant & 1),
                    0.5 * cheb.nodes[jy] + shift((octant >> 1) & 1),
                    0.5 * cheb.nodes[jz] + shift((octant >> 2) & 1),
                ];
                assert_relative_eq!(child_values[j], poly(point), epsilon = 1e-12);
            }
        }
    }
}
