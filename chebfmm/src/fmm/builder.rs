//! Builder for the Chebyshev FMM engine.
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bytemuck::Pod;
use num::Float;
use rlst::RlstScalar;

use crate::cheb::ChebTransforms;
use crate::fmm::constants::DEFAULT_WORKSPACE_CAP;
use crate::fmm::exchange::{LocalExchange, OperatorExchange};
use crate::fmm::operators::OperatorCache;
use crate::fmm::types::{ChebFmm, OperatorTag};
use crate::traits::fmm::InteractionExecutor;
use crate::traits::kernel::KernelMetadata;
use crate::traits::types::{ExecutionBackend, FmmError, InteractionCategory};
use crate::tree::types::Octree;

/// Staged construction of a [`ChebFmm`]: set a tree, set the expansion
/// parameters, then `build()`. Building warms the operator cache and
/// freezes every interaction descriptor, so the tree shape must not change
/// afterwards; `evaluate` only executes.
pub struct ChebFmmBuilder<Scalar, Kern>
where
    Scalar: RlstScalar<Real = Scalar> + Float + Default + Pod,
    Kern: KernelMetadata<T = Scalar> + Clone,
{
    tree: Option<Octree<Scalar>>,
    order: Option<usize>,
    kernel: Option<Kern>,
    aux_kernel: Option<Kern>,
    store_dir: Option<PathBuf>,
    exchange: Option<Box<dyn OperatorExchange + Send + Sync>>,
    backend: ExecutionBackend,
    workspace_cap: usize,
    timed: bool,
}

impl<Scalar, Kern> Default for ChebFmmBuilder<Scalar, Kern>
where
    Scalar: RlstScalar<Real = Scalar> + Float + Default + Pod,
    Kern: KernelMetadata<T = Scalar> + Clone,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<Scalar, Kern> ChebFmmBuilder<Scalar, Kern>
where
    Scalar: RlstScalar<Real = Scalar> + Float + Default + Pod,
    Kern: KernelMetadata<T = Scalar> + Clone,
{
    /// An empty builder.
    pub fn new() -> Self {
        ChebFmmBuilder {
            tree: None,
            order: None,
            kernel: None,
            aux_kernel: None,
            store_dir: None,
            exchange: None,
            backend: ExecutionBackend::default(),
            workspace_cap: DEFAULT_WORKSPACE_CAP,
            timed: false,
        }
    }

    /// The octree the engine evaluates over.
    pub fn tree(mut self, tree: Octree<Scalar>) -> Self {
        self.tree = Some(tree);
        self
    }

    /// Truncation order per axis and the interaction kernel.
    pub fn parameters(mut self, order: usize, kernel: Kern) -> Self {
        self.order = Some(order);
        self.kernel = Some(kernel);
        self
    }

    /// Second kernel assembling the charge-side operator families (near
    /// field, upward, downward).
    pub fn aux_kernel(mut self, kernel: Kern) -> Self {
        self.aux_kernel = Some(kernel);
        self
    }

    /// Directory for persisting canonical operators across runs.
    pub fn operator_store<P: AsRef<Path>>(mut self, dir: P) -> Self {
        self.store_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Operator transport for cooperating engine instances.
    pub fn exchange(mut self, exchange: Box<dyn OperatorExchange + Send + Sync>) -> Self {
        self.exchange = Some(exchange);
        self
    }

    /// Execution backend used by `evaluate`.
    pub fn backend(mut self, backend: ExecutionBackend) -> Self {
        self.backend = backend;
        self
    }

    /// Cap in bytes on a single gather workspace of the batched backend.
    pub fn workspace_cap(mut self, bytes: usize) -> Self {
        self.workspace_cap = bytes;
        self
    }

    /// Record per-operator wall-clock times during `evaluate`.
    pub fn timed(mut self, timed: bool) -> Self {
        self.timed = timed;
        self
    }

    /// Construct the engine: build the Chebyshev transforms, warm the
    /// operator cache, and freeze every interaction descriptor.
    pub fn build(self) -> Result<ChebFmm<Scalar, Kern>, FmmError> {
        let tree = self
            .tree
            .ok_or_else(|| FmmError::Failed("builder requires a tree".to_string()))?;
        let order = self
            .order
            .ok_or_else(|| FmmError::Failed("builder requires parameters".to_string()))?;
        let kernel = self.kernel.unwrap();
        if order < 2 {
            return Err(FmmError::Failed(
                "truncation order must be at least 2".to_string(),
            ));
        }

        let n_coeffs = order * order * order;
        let cheb = Arc::new(ChebTransforms::new(order));
        let cache = OperatorCache::new(
            kernel.clone(),
            self.aux_kernel,
            order,
            tree.domain.side_length[0],
            cheb.clone(),
            self.store_dir.as_deref(),
            self.exchange.unwrap_or_else(|| Box::new(LocalExchange)),
        )?;

        let mut m2m = Vec::with_capacity(8);
        let mut l2l = Vec::with_capacity(8);
        for octant in 0..8 {
            m2m.push(cache.interpolation(OperatorTag::ChildToParent, octant)?);
            l2l.push(cache.interpolation(OperatorTag::ParentToChild, octant)?);
        }

        let n_nodes = tree.n_nodes();
        let depth = tree.depth;
        let mut fmm = ChebFmm {
            tree,
            kernel,
            order,
            n_coeffs,
            cheb,
            cache,
            multipoles: vec![Scalar::zero(); n_nodes * n_coeffs],
            locals: vec![Scalar::zero(); n_nodes * n_coeffs],
            direct: vec![Scalar::zero(); n_nodes * n_coeffs],
            descriptors: BTreeMap::new(),
            m2m,
            l2l,
            backend: self.backend,
            workspace_cap: self.workspace_cap,
            timed: self.timed,
            operator_times: Vec::new(),
        };

        for level in 1..=depth {
            for category in [
                InteractionCategory::NearField,
                InteractionCategory::SameLevel,
                InteractionCategory::Upward,
                InteractionCategory::Downward,
            ] {
                let descriptor = fmm.setup(level, category)?;
                if !descriptor.groups.is_empty() {
                    fmm.descriptors.insert((category, level), Arc::new(descriptor));
                }
            }
        }
        Ok(fmm)
    }
}

#[cfg(test)]
mod test {
    extern crate blas_src;
    extern crate lapack_src;

    use green_kernels::laplace_3d::Laplace3dKernel;

    use super::*;
    use crate::tree::types::Domain;

    #[test]
    fn test_missing_stages_rejected() {
        let no_tree = ChebFmmBuilder::<f64, Laplace3dKernel<f64>>::new()
            .parameters(3, Laplace3dKernel::new())
            .build();
        assert!(no_tree.is_err());

        let no_parameters = ChebFmmBuilder::<f64, Laplace3dKernel<f64>>::new()
            .tree(Octree::uniform(Domain::unit(), 1).unwrap())
            .build();
        assert!(no_parameters.is_err());

        let bad_order = ChebFmmBuilder::new()
            .tree(Octree::<f64>::uniform(Domain::unit(), 1).unwrap())
            .parameters(1, Laplace3dKernel::new())
            .build();
        assert!(bad_order.is_err());
    }

    #[test]
    fn test_build_freezes_descriptors() {
        let fmm = ChebFmmBuilder::new()
            .tree(Octree::<f64>::uniform(Domain::unit(), 2).unwrap())
            .parameters(2, Laplace3dKernel::new())
            .build()
            .unwrap();

        // A depth 2 uniform tree has near-field work at both levels and
        // same-level well-separated work at the leaf level only.
        assert!(fmm
            .descriptors
            .contains_key(&(InteractionCategory::NearField, 1)));
        assert!(fmm
            .descriptors
            .contains_key(&(InteractionCategory::NearField, 2)));
        assert!(fmm
            .descriptors
            .contains_key(&(InteractionCategory::SameLevel, 2)));
        assert!(!fmm
            .descriptors
            .contains_key(&(InteractionCategory::Upward, 2)));

        let descriptor = &fmm.descriptors[&(InteractionCategory::SameLevel, 2)];
        assert!(descriptor.n_pairs() > 0);
    }
}
