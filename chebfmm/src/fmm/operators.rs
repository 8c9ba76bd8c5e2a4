//! Operator cache: canonical assembly, symmetry derivation, persistence.
//!
//! Interaction operators are kernel matrices between the Chebyshev grids of
//! two boxes in a relative configuration. Configurations related by a signed
//! axis permutation share one canonical matrix; the cache assembles (or
//! loads) canonical matrices only and derives the rest by permuting grid
//! indices. For homogenous kernels a canonical matrix is assembled at one
//! reference level and rescaled exactly for every other level.
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, RwLock};

use bytemuck::Pod;
use green_kernels::types::EvalType;
use num::Float;
use rayon::prelude::*;
use rlst::{rlst_dynamic_array2, RawAccess, RawAccessMut, RlstScalar, Shape};

use crate::cheb::ChebTransforms;
use crate::fmm::constants::N_SYMMETRIES;
use crate::fmm::exchange::{decode_operator, encode_operator, OperatorExchange};
use crate::fmm::store::OperatorStore;
use crate::fmm::types::{ConfigKey, Matrix2, OperatorKey, OperatorTag};
use crate::traits::kernel::{KernelMetadata, KernelSymmetry};
use crate::traits::types::{FmmError, InteractionCategory};

const AXIS_PERMUTATIONS: [[usize; 3]; 6] = [
    [0, 1, 2],
    [0, 2, 1],
    [1, 0, 2],
    [1, 2, 0],
    [2, 0, 1],
    [2, 1, 0],
];

/// One of the 48 signed axis permutations, `y_d = sign[d] * x[perm[d]]`.
/// Element 0 is the identity.
pub fn group_element(element: usize) -> ([usize; 3], [i8; 3]) {
    debug_assert!(element < N_SYMMETRIES);
    let perm = AXIS_PERMUTATIONS[element / 8];
    let bits = element % 8;
    let signs = [
        if bits & 1 == 0 { 1 } else { -1 },
        if (bits >> 1) & 1 == 0 { 1 } else { -1 },
        if (bits >> 2) & 1 == 0 { 1 } else { -1 },
    ];
    (perm, signs)
}

/// Apply a group element to an offset vector.
pub fn apply_to_offset(element: usize, offset: [i8; 3]) -> [i8; 3] {
    let (perm, signs) = group_element(element);
    [
        signs[0] * offset[perm[0]],
        signs[1] * offset[perm[1]],
        signs[2] * offset[perm[2]],
    ]
}

/// Canonical form of a configuration under the declared kernel symmetry,
/// together with the group element `h` mapping the configuration's offset
/// onto the canonical offset.
pub fn canonicalize(config: ConfigKey, symmetry: KernelSymmetry) -> (ConfigKey, usize) {
    match symmetry {
        KernelSymmetry::None => (config, 0),
        KernelSymmetry::Radial => {
            let mut canonical = config.offset.map(|o| o.abs());
            canonical.sort_unstable_by(|a, b| b.cmp(a));
            let element = (0..N_SYMMETRIES)
                .find(|&e| apply_to_offset(e, config.offset) == canonical)
                .unwrap();
            (
                ConfigKey {
                    level_diff: config.level_diff,
                    offset: canonical,
                },
                element,
            )
        }
    }
}

/// Grid-index permutation realizing a group element on the tensor Chebyshev
/// grid, with a per-index sign carried for kernels whose components flip
/// under reflections. Scalar radial kernels carry unit signs throughout.
pub struct SymmetryPermutation {
    /// Image of each tensor grid index.
    pub index: Vec<usize>,
    /// Sign picked up by each grid index.
    pub signs: Vec<i8>,
}

impl SymmetryPermutation {
    /// The permutation of an `order^3` grid under a group element. Relies on
    /// the node symmetry `t_{n-1-i} = -t_i` of the Chebyshev roots.
    pub fn new(order: usize, element: usize) -> Self {
        let (perm, signs) = group_element(element);
        let n_coeffs = order * order * order;
        let mut index = Vec::with_capacity(n_coeffs);
        for m in 0..n_coeffs {
            let components = [m % order, (m / order) % order, m / (order * order)];
            let mut image = [0usize; 3];
            for d in 0..3 {
                let component = components[perm[d]];
                image[d] = if signs[d] > 0 {
                    component
                } else {
                    order - 1 - component
                };
            }
            index.push(image[0] + order * image[1] + order * order * image[2]);
        }
        SymmetryPermutation {
            index,
            signs: vec![1; n_coeffs],
        }
    }
}

/// Legal configuration check for an interaction category.
///
/// Offsets are centre-to-centre displacements in units of half the finer
/// box's side, so same-level offsets are even and cross-level offsets odd;
/// closed-cube adjacency is a componentwise bound (2 at the same level, 3
/// across one level). Near field requires adjacency, the well-separated
/// categories forbid it and are bounded by the colleague construction.
pub fn validate_config(category: InteractionCategory, config: ConfigKey) -> Result<(), FmmError> {
    let mismatch = |reason: &str| {
        Err(FmmError::ConfigurationMismatch(format!(
            "{:?} {:?}: {}",
            category, config, reason
        )))
    };

    let level_diff_ok = match category {
        InteractionCategory::NearField => (-1..=1).contains(&config.level_diff),
        InteractionCategory::SameLevel => config.level_diff == 0,
        InteractionCategory::Upward => config.level_diff == 1,
        InteractionCategory::Downward => config.level_diff == -1,
    };
    if !level_diff_ok {
        return mismatch("level difference outside category");
    }

    let parity = if config.level_diff == 0 { 0 } else { 1 };
    if config.offset.iter().any(|o| (o.abs() % 2) != parity) {
        return mismatch("offset parity inconsistent with level difference");
    }

    let adjacency_bound = if config.level_diff == 0 { 2 } else { 3 };
    let adjacent = config.offset.iter().all(|o| o.abs() <= adjacency_bound);
    match category {
        InteractionCategory::NearField => {
            if !adjacent {
                return mismatch("near-field configuration is not adjacent");
            }
        }
        InteractionCategory::SameLevel => {
            if adjacent {
                return mismatch("well-separated configuration is adjacent");
            }
            if config.offset.iter().any(|o| o.abs() > 6) {
                return mismatch("offset outside the colleague range");
            }
        }
        InteractionCategory::Upward | InteractionCategory::Downward => {
            if adjacent {
                return mismatch("well-separated configuration is adjacent");
            }
            if config.offset.iter().any(|o| o.abs() > 5) {
                return mismatch("offset outside the neighbour-child range");
            }
        }
    }
    Ok(())
}

/// Translation operator cache shared by every executor.
pub struct OperatorCache<Scalar, Kern>
where
    Scalar: RlstScalar<Real = Scalar> + Float + Pod,
    Kern: KernelMetadata<T = Scalar>,
{
    kernel: Kern,
    aux_kernel: Option<Kern>,
    order: usize,
    n_coeffs: usize,
    cheb: Arc<ChebTransforms<Scalar>>,
    root_side: Scalar,
    primary_store: Option<OperatorStore>,
    charge_store: Option<OperatorStore>,
    exchange: Box<dyn OperatorExchange + Send + Sync>,
    operators: RwLock<HashMap<OperatorKey, Arc<Matrix2<Scalar>>>>,
    canonical_refs: RwLock<HashMap<(OperatorTag, ConfigKey), (u32, Arc<Matrix2<Scalar>>)>>,
    permutations: RwLock<HashMap<usize, Arc<SymmetryPermutation>>>,
}

impl<Scalar, Kern> OperatorCache<Scalar, Kern>
where
    Scalar: RlstScalar<Real = Scalar> + Float + Pod,
    Kern: KernelMetadata<T = Scalar>,
{
    /// A cache for one kernel/order/domain combination. When `aux_kernel` is
    /// present it assembles the charge-side categories (near field, upward,
    /// downward) and the primary kernel the rest; when `store_dir` is
    /// present canonical interaction operators are persisted there.
    pub fn new(
        kernel: Kern,
        aux_kernel: Option<Kern>,
        order: usize,
        root_side: Scalar,
        cheb: Arc<ChebTransforms<Scalar>>,
        store_dir: Option<&Path>,
        exchange: Box<dyn OperatorExchange + Send + Sync>,
    ) -> Result<Self, FmmError> {
        let primary_store = store_dir
            .map(|dir| OperatorStore::new(dir, &kernel.signature(), order))
            .transpose()?;
        let charge_store = match (&aux_kernel, store_dir) {
            (Some(aux), Some(dir)) => Some(OperatorStore::new(dir, &aux.signature(), order)?),
            _ => None,
        };
        Ok(OperatorCache {
            kernel,
            aux_kernel,
            order,
            n_coeffs: order * order * order,
            cheb,
            root_side,
            primary_store,
            charge_store,
            exchange,
            operators: RwLock::new(HashMap::new()),
            canonical_refs: RwLock::new(HashMap::new()),
            permutations: RwLock::new(HashMap::new()),
        })
    }

    /// The kernel that assembles a given operator family.
    fn kernel_for(&self, tag: OperatorTag) -> &Kern {
        match tag {
            OperatorTag::Interaction(InteractionCategory::NearField)
            | OperatorTag::Interaction(InteractionCategory::Upward)
            | OperatorTag::Interaction(InteractionCategory::Downward) => {
                self.aux_kernel.as_ref().unwrap_or(&self.kernel)
            }
            _ => &self.kernel,
        }
    }

    fn store_for(&self, tag: OperatorTag) -> Option<&OperatorStore> {
        match tag {
            OperatorTag::Interaction(InteractionCategory::NearField)
            | OperatorTag::Interaction(InteractionCategory::Upward)
            | OperatorTag::Interaction(InteractionCategory::Downward)
                if self.aux_kernel.is_some() =>
            {
                self.charge_store.as_ref()
            }
            _ => self.primary_store.as_ref(),
        }
    }

    /// The translation operator for a configuration at a level. Builds and
    /// memoizes on first use; after warm-up every call is a read-lock hit.
    pub fn operator(
        &self,
        level: u32,
        tag: OperatorTag,
        config: ConfigKey,
    ) -> Result<Arc<Matrix2<Scalar>>, FmmError> {
        let level = match tag {
            // Child/parent interpolation maps are level independent.
            OperatorTag::ChildToParent | OperatorTag::ParentToChild => 0,
            OperatorTag::Interaction(_) => level,
        };
        let key = OperatorKey { level, tag, config };
        if let Some(operator) = self.operators.read().unwrap().get(&key) {
            return Ok(operator.clone());
        }
        let operator = self.build(&key)?;
        self.operators
            .write()
            .unwrap()
            .entry(key)
            .or_insert(operator.clone());
        Ok(operator)
    }

    /// The child/parent interpolation map of one octant.
    pub fn interpolation(
        &self,
        tag: OperatorTag,
        octant: usize,
    ) -> Result<Arc<Matrix2<Scalar>>, FmmError> {
        let level_diff = match tag {
            OperatorTag::ChildToParent => 1,
            OperatorTag::ParentToChild => -1,
            OperatorTag::Interaction(_) => {
                return Err(FmmError::ConfigurationMismatch(
                    "interaction operators are not octant keyed".to_string(),
                ))
            }
        };
        let offset = [
            if octant & 1 == 1 { 1 } else { -1 },
            if (octant >> 1) & 1 == 1 { 1 } else { -1 },
            if (octant >> 2) & 1 == 1 { 1 } else { -1 },
        ];
        self.operator(0, tag, ConfigKey { level_diff, offset })
    }

    /// The grid permutation realizing a symmetry group element.
    pub fn permutation(&self, element: usize) -> Arc<SymmetryPermutation> {
        if let Some(permutation) = self.permutations.read().unwrap().get(&element) {
            return permutation.clone();
        }
        let permutation = Arc::new(SymmetryPermutation::new(self.order, element));
        self.permutations
            .write()
            .unwrap()
            .entry(element)
            .or_insert(permutation.clone());
        permutation
    }

    fn build(&self, key: &OperatorKey) -> Result<Arc<Matrix2<Scalar>>, FmmError> {
        match key.tag {
            OperatorTag::ChildToParent | OperatorTag::ParentToChild => {
                self.build_interpolation(key)
            }
            OperatorTag::Interaction(category) => {
                validate_config(category, key.config)?;
                let symmetry = self.kernel_for(key.tag).symmetry();
                let (canonical, element) = canonicalize(key.config, symmetry);
                if canonical == key.config {
                    self.build_canonical(key)
                } else {
                    let reference = self.operator(key.level, key.tag, canonical)?;
                    let permutation = self.permutation(element);
                    Ok(Arc::new(permute_operator(&reference, &permutation)))
                }
            }
        }
    }

    fn build_interpolation(&self, key: &OperatorKey) -> Result<Arc<Matrix2<Scalar>>, FmmError> {
        let expected_diff = if key.tag == OperatorTag::ChildToParent {
            1
        } else {
            -1
        };
        if key.config.level_diff != expected_diff
            || key.config.offset.iter().any(|o| o.abs() != 1)
        {
            return Err(FmmError::ConfigurationMismatch(format!(
                "{:?} is not an octant configuration for {:?}",
                key.config, key.tag
            )));
        }
        let octant = ((key.config.offset[0] == 1) as usize)
            | (((key.config.offset[1] == 1) as usize) << 1)
            | (((key.config.offset[2] == 1) as usize) << 2);
        let map = match key.tag {
            OperatorTag::ChildToParent => self.cheb.child_to_parent(octant),
            _ => self.cheb.parent_to_child(octant),
        };
        Ok(Arc::new(map))
    }

    // Assembly order for a canonical interaction operator: persisted store,
    // homogenous rescaling of a reference level, exchange transfer, kernel
    // evaluation. Store failures degrade to recomputation.
    fn build_canonical(&self, key: &OperatorKey) -> Result<Arc<Matrix2<Scalar>>, FmmError> {
        if let Some(store) = self.store_for(key.tag) {
            if let Some(operator) = store.load::<Scalar>(key) {
                log::debug!("loaded operator {:?} from store", key);
                let operator = Arc::new(operator);
                self.record_reference(key, &operator);
                return Ok(operator);
            }
        }

        if let Some(degree) = self.kernel_for(key.tag).homogeneity() {
            let reference = self
                .canonical_refs
                .read()
                .unwrap()
                .get(&(key.tag, key.config))
                .cloned();
            if let Some((reference_level, reference)) = reference {
                let exponent = (reference_level as i32 - key.level as i32) * degree;
                let factor = Float::powi(Scalar::from(2.0).unwrap(), exponent);
                let operator = Arc::new(scale_operator(&reference, factor));
                self.persist(key, &operator);
                return Ok(operator);
            }
        }

        let operator = if self.exchange.is_builder() {
            let operator = self.assemble_interaction(key)?;
            self.exchange.publish(key, &encode_operator(&operator))?;
            operator
        } else {
            let bytes = self.exchange.fetch(key)?.ok_or_else(|| {
                FmmError::Failed(format!("operator {:?} not available from exchange", key))
            })?;
            decode_operator(&bytes)?
        };

        let operator = Arc::new(operator);
        self.persist(key, &operator);
        self.record_reference(key, &operator);
        Ok(operator)
    }

    fn record_reference(&self, key: &OperatorKey, operator: &Arc<Matrix2<Scalar>>) {
        self.canonical_refs
            .write()
            .unwrap()
            .entry((key.tag, key.config))
            .or_insert((key.level, operator.clone()));
    }

    fn persist(&self, key: &OperatorKey, operator: &Arc<Matrix2<Scalar>>) {
        if let Some(store) = self.store_for(key.tag) {
            if let Err(error) = store.save(key, operator) {
                log::warn!("failed to persist operator {:?}: {}", key, error);
            }
        }
    }

    /// Column-by-column kernel assembly: a unit charge at each source grid
    /// node, evaluated at every target grid node.
    fn assemble_interaction(&self, key: &OperatorKey) -> Result<Matrix2<Scalar>, FmmError> {
        let source_level = key.level as i64 + key.config.level_diff as i64;
        if source_level < 0 {
            return Err(FmmError::ConfigurationMismatch(format!(
                "{:?} has no source level above the root",
                key
            )));
        }
        let target_side = self.root_side / Scalar::from(1u64 << key.level).unwrap();
        let source_side = self.root_side / Scalar::from(1u64 << source_level).unwrap();
        let half_finer = Float::min(target_side, source_side) / Scalar::from(2.0).unwrap();
        let source_centre = [
            Scalar::from(key.config.offset[0]).unwrap() * half_finer,
            Scalar::from(key.config.offset[1]).unwrap() * half_finer,
            Scalar::from(key.config.offset[2]).unwrap() * half_finer,
        ];

        let targets = self.cheb.grid_points([Scalar::zero(); 3], target_side);
        let sources = self.cheb.grid_points(source_centre, source_side);
        let kernel = self.kernel_for(key.tag);

        let n = self.n_coeffs;
        let mut operator = rlst_dynamic_array2!(Scalar, [n, n]);
        operator
            .data_mut()
            .par_chunks_exact_mut(n)
            .enumerate()
            .for_each(|(source_index, column)| {
                kernel.evaluate_st(
                    EvalType::Value,
                    &sources[3 * source_index..3 * (source_index + 1)],
                    &targets,
                    &[Scalar::one()],
                    column,
                );
            });

        if operator.data().iter().any(|value| !value.is_finite()) {
            return Err(FmmError::OperatorBuild(format!(
                "non-finite entries assembling {:?}",
                key
            )));
        }
        log::debug!("assembled operator {:?}", key);
        Ok(operator)
    }
}

/// Derive a non-canonical operator from its canonical form: conjugate by
/// the grid permutation on both index sets.
fn permute_operator<Scalar>(
    canonical: &Matrix2<Scalar>,
    permutation: &SymmetryPermutation,
) -> Matrix2<Scalar>
where
    Scalar: RlstScalar<Real = Scalar> + Float,
{
    let [rows, cols] = canonical.shape();
    let mut derived = rlst_dynamic_array2!(Scalar, [rows, cols]);
    let derived_data = derived.data_mut();
    let canonical_data = canonical.data();
    for col in 0..cols {
        let image_col = permutation.index[col];
        for row in 0..rows {
            let image_row = permutation.index[row];
            let mut value = canonical_data[image_row + rows * image_col];
            if permutation.signs[row] * permutation.signs[col] < 0 {
                value = -value;
            }
            derived_data[row + rows * col] = value;
        }
    }
    derived
}

fn scale_operator<Scalar>(reference: &Matrix2<Scalar>, factor: Scalar) -> Matrix2<Scalar>
where
    Scalar: RlstScalar<Real = Scalar> + Float,
{
    let [rows, cols] = reference.shape();
    let mut scaled = rlst_dynamic_array2!(Scalar, [rows, cols]);
    for (out, &value) in scaled.data_mut().iter_mut().zip(reference.data().iter()) {
        *out = value * factor;
    }
    scaled
}

#[cfg(test)]
mod test {
    use std::collections::HashSet;

    use approx::assert_relative_eq;
    use green_kernels::laplace_3d::Laplace3dKernel;

    use super::*;
    use crate::fmm::exchange::LocalExchange;

    fn laplace_cache(
        order: usize,
        store_dir: Option<&Path>,
    ) -> OperatorCache<f64, Laplace3dKernel<f64>> {
        let cheb = Arc::new(ChebTransforms::new(order));
        OperatorCache::new(
            Laplace3dKernel::new(),
            None,
            order,
            1.0,
            cheb,
            store_dir,
            Box::new(LocalExchange),
        )
        .unwrap()
    }

    #[test]
    fn test_group_is_complete() {
        let (perm, signs) = group_element(0);
        assert_eq!(perm, [0, 1, 2]);
        assert_eq!(signs, [1, 1, 1]);

        let images: HashSet<[i8; 3]> = (0..N_SYMMETRIES)
            .map(|e| apply_to_offset(e, [1, 2, 3]))
            .collect();
        assert_eq!(images.len(), N_SYMMETRIES);
    }

    #[test]
    fn test_canonicalize_sorts_absolute_offsets() {
        let config = ConfigKey {
            level_diff: 0,
            offset: [-4, 6, 0],
        };
        let (canonical, element) = canonicalize(config, KernelSymmetry::Radial);
        assert_eq!(canonical.offset, [6, 4, 0]);
        assert_eq!(apply_to_offset(element, config.offset), canonical.offset);

        let (untouched, element) = canonicalize(config, KernelSymmetry::None);
        assert_eq!(untouched, config);
        assert_eq!(element, 0);
    }

    #[test]
    fn test_validate_config() {
        let same = |offset| ConfigKey {
            level_diff: 0,
            offset,
        };
        assert!(validate_config(InteractionCategory::NearField, same([2, 0, -2])).is_ok());
        assert!(validate_config(InteractionCategory::NearField, same([4, 0, 0])).is_err());
        assert!(validate_config(InteractionCategory::SameLevel, same([4, -2, 0])).is_ok());
        assert!(validate_config(InteractionCategory::SameLevel, same([2, 2, 2])).is_err());
        assert!(validate_config(InteractionCategory::SameLevel, same([3, 0, 0])).is_err());
        assert!(validate_config(InteractionCategory::SameLevel, same([8, 0, 0])).is_err());

        let up = ConfigKey {
            level_diff: 1,
            offset: [5, 3, -1],
        };
        assert!(validate_config(InteractionCategory::Upward, up).is_ok());
        assert!(validate_config(InteractionCategory::Downward, up).is_err());
        let adjacent = ConfigKey {
            level_diff: 1,
            offset: [3, 1, 1],
        };
        assert!(validate_config(InteractionCategory::Upward, adjacent).is_err());
        assert!(validate_config(InteractionCategory::NearField, adjacent).is_ok());
    }

    #[test]
    fn test_permuted_operator_matches_direct_assembly() {
        let cache = laplace_cache(3, None);
        for (level_diff, offset, category) in [
            (0i8, [-4i8, 2, 0], InteractionCategory::SameLevel),
            (1, [-5, 3, 1], InteractionCategory::Upward),
            (-1, [1, -5, 3], InteractionCategory::Downward),
            (0, [0, -2, 2], InteractionCategory::NearField),
        ] {
            let config = ConfigKey { level_diff, offset };
            let tag = OperatorTag::Interaction(category);
            let derived = cache.operator(2, tag, config).unwrap();
            let direct = cache
                .assemble_interaction(&OperatorKey {
                    level: 2,
                    tag,
                    config,
                })
                .unwrap();
            for (derived, direct) in derived.data().iter().zip(direct.data().iter()) {
                assert_relative_eq!(derived, direct, max_relative = 1e-10);
            }
        }
    }

    #[test]
    fn test_homogenous_rescaling_matches_direct_assembly() {
        let cache = laplace_cache(3, None);
        let tag = OperatorTag::Interaction(InteractionCategory::SameLevel);
        let config = ConfigKey {
            level_diff: 0,
            offset: [6, 0, 0],
        };

        // Warm level 2 so level 4 is served by rescaling.
        cache.operator(2, tag, config).unwrap();
        let rescaled = cache.operator(4, tag, config).unwrap();
        let direct = cache
            .assemble_interaction(&OperatorKey {
                level: 4,
                tag,
                config,
            })
            .unwrap();
        for (rescaled, direct) in rescaled.data().iter().zip(direct.data().iter()) {
            assert_relative_eq!(rescaled, direct, max_relative = 1e-12);
        }
    }

    #[test]
    fn test_store_round_trip_through_cache() {
        let dir = tempfile::tempdir().unwrap();
        let tag = OperatorTag::Interaction(InteractionCategory::SameLevel);
        let config = ConfigKey {
            level_diff: 0,
            offset: [4, 4, 0],
        };

        let first = laplace_cache(2, Some(dir.path()));
        let assembled = first.operator(3, tag, config).unwrap();

        let second = laplace_cache(2, Some(dir.path()));
        let loaded = second.operator(3, tag, config).unwrap();
        for (loaded, assembled) in loaded.data().iter().zip(assembled.data().iter()) {
            assert_eq!(loaded.to_bits(), assembled.to_bits());
        }
    }

    #[test]
    fn test_interpolation_maps_are_transposes() {
        let cache = laplace_cache(3, None);
        let n = 27;
        for octant in 0..8 {
            let up = cache
                .interpolation(OperatorTag::ChildToParent, octant)
                .unwrap();
            let down = cache
                .interpolation(OperatorTag::ParentToChild, octant)
                .unwrap();
            for col in 0..n {
                for row in 0..n {
                    assert_eq!(up.data()[row + n * col], down.data()[col + n * row]);
                }
            }
        }
    }
}
