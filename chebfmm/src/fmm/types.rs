//! Data structures for the Chebyshev FMM translation engine.
use std::collections::BTreeMap;
use std::sync::Arc;

use bytemuck::Pod;
use num::Float;
use rlst::{Array, BaseArray, RlstScalar, VectorContainer};

use crate::cheb::ChebTransforms;
use crate::fmm::operators::OperatorCache;
use crate::traits::kernel::KernelMetadata;
use crate::traits::types::{ExecutionBackend, FmmOperatorTime, InteractionCategory};
use crate::tree::types::Octree;

/// Dense two-dimensional array in column-major order.
pub type Matrix2<T> = Array<T, BaseArray<T, VectorContainer<T>, 2>, 2>;

/// Represents a threadsafe mutable raw pointer to `T`.
///
/// Used where disjoint regions of a shared buffer are written from worker
/// threads; the caller upholds Rust's aliasing rules manually.
#[derive(Clone, Debug, Copy)]
pub struct SendPtrMut<T> {
    /// Holds the raw mutable pointer to an instance of `T`.
    pub raw: *mut T,
}

unsafe impl<T> Sync for SendPtrMut<T> {}
unsafe impl<T> Send for SendPtrMut<T> {}

impl<T> Default for SendPtrMut<T> {
    fn default() -> Self {
        SendPtrMut {
            raw: std::ptr::null_mut(),
        }
    }
}

/// Relative spatial configuration of a source box with respect to a target
/// box, the unit of operator reuse.
///
/// `offset` is the centre-to-centre displacement measured in units of half
/// the finer box's side length, which is integral for every configuration
/// the engine meets; `level_diff` is source level minus target level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ConfigKey {
    /// Source level minus target level, in `-1..=1`.
    pub level_diff: i8,

    /// Centre-to-centre displacement in half-finer-side units.
    pub offset: [i8; 3],
}

/// Operator families served by the operator cache: the four interaction
/// categories plus the Chebyshev child/parent maps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OperatorTag {
    /// Kernel matrix for an interaction category.
    Interaction(InteractionCategory),
    /// Child to parent multipole interpolation map (M2M).
    ChildToParent,
    /// Parent to child local interpolation map (L2L).
    ParentToChild,
}

/// Full key of a translation operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct OperatorKey {
    /// Target tree level. Interpolation maps are level independent and use 0.
    pub level: u32,
    /// Operator family.
    pub tag: OperatorTag,
    /// Relative configuration.
    pub config: ConfigKey,
}

/// One batched unit of work within a setup descriptor: every source/target
/// pair sharing a relative configuration, and therefore an operator.
pub struct ConfigGroup<T>
where
    T: RlstScalar,
{
    /// The shared configuration.
    pub config: ConfigKey,

    /// The translation operator for this configuration.
    pub operator: Arc<Matrix2<T>>,

    /// Arena indices of the source node of each pair.
    pub sources: Vec<usize>,

    /// Arena indices of the target node of each pair, parallel to `sources`.
    pub targets: Vec<usize>,
}

/// Backend-agnostic output of an executor's Setup step for one level and
/// category: pair lists grouped by configuration, in deterministic
/// configuration order. Valid for as long as the tree shape is unchanged.
pub struct SetupDescriptor<T>
where
    T: RlstScalar,
{
    /// Tree level of the target nodes.
    pub level: u32,

    /// Interaction category.
    pub category: InteractionCategory,

    /// Configuration groups, ordered by configuration key.
    pub groups: Vec<ConfigGroup<T>>,
}

impl<T> SetupDescriptor<T>
where
    T: RlstScalar,
{
    /// Total number of source/target pairs across all groups.
    pub fn n_pairs(&self) -> usize {
        self.groups.iter().map(|group| group.sources.len()).sum()
    }
}

/// Holds all data and metadata for evaluating a Chebyshev FMM within one
/// process.
pub struct ChebFmm<Scalar, Kern>
where
    Scalar: RlstScalar<Real = Scalar> + Float + Default + Pod,
    Kern: KernelMetadata<T = Scalar>,
{
    /// The octree over sources and targets.
    pub tree: Octree<Scalar>,

    /// The interaction kernel.
    pub kernel: Kern,

    /// Truncation order of the Chebyshev approximation per axis.
    pub order: usize,

    /// Coefficients per box, `order^3` for a scalar kernel.
    pub n_coeffs: usize,

    /// Chebyshev transform matrices shared by every level.
    pub cheb: Arc<ChebTransforms<Scalar>>,

    /// Translation operator cache.
    pub cache: OperatorCache<Scalar, Kern>,

    /// Upward-pass compressed representations, `n_coeffs` per arena node.
    pub multipoles: Vec<Scalar>,

    /// Downward-pass compressed representations, `n_coeffs` per arena node.
    pub locals: Vec<Scalar>,

    /// Directly accumulated near-field values, `n_coeffs` per arena node,
    /// populated for leaves only.
    pub direct: Vec<Scalar>,

    /// Setup descriptors for every (category, level), built once at
    /// construction while the cache is warmed.
    pub descriptors: BTreeMap<(InteractionCategory, u32), Arc<SetupDescriptor<Scalar>>>,

    /// Child to parent multipole maps in octant order.
    pub m2m: Vec<Arc<Matrix2<Scalar>>>,

    /// Parent to child local maps in octant order.
    pub l2l: Vec<Arc<Matrix2<Scalar>>>,

    /// Execution backend used by `evaluate`.
    pub backend: ExecutionBackend,

    /// Upper bound in bytes on a single gather buffer of the batched
    /// backend; larger groups fall back to the reference path.
    pub workspace_cap: usize,

    /// Record per-operator wall-clock times during `evaluate`.
    pub timed: bool,

    /// Collected operator times of the most recent `evaluate` call.
    pub operator_times: Vec<FmmOperatorTime>,
}
