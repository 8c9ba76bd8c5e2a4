//! The four interaction executors: near field, same-level well-separated,
//! upward well-separated, downward well-separated.
//!
//! Setup enumerates source/target pairs for one category at one target
//! level and groups them by relative configuration; it does no floating
//! point work and its output is backend agnostic. Execute applies one
//! translation operator per group, either pair-by-pair or as a single
//! batched product, and accumulates into the category's target buffer in
//! a fixed group order.
use std::collections::BTreeMap;

use bytemuck::Pod;
use num::Float;
use rayon::prelude::*;
use rlst::{empty_array, rlst_array_from_slice2, MultIntoResize, RawAccess, RlstScalar};

use crate::fmm::collect::{gather_columns, scatter_accumulate};
use crate::fmm::types::{ChebFmm, ConfigGroup, ConfigKey, OperatorTag, SetupDescriptor};
use crate::traits::fmm::InteractionExecutor;
use crate::traits::kernel::KernelMetadata;
use crate::traits::types::{ExecutionBackend, FmmError, InteractionCategory};
use crate::tree::types::BoxKey;

/// Relative configuration of a source box with respect to a target box:
/// centre-to-centre displacement in units of half the finer box's side.
pub fn relative_config(target: &BoxKey, source: &BoxKey) -> ConfigKey {
    let finer = target.level.max(source.level);
    let centre = |key: &BoxKey| {
        let shift = finer - key.level;
        [0, 1, 2].map(|d| (2 * key.index[d] as i64 + 1) << shift)
    };
    let target_centre = centre(target);
    let source_centre = centre(source);
    ConfigKey {
        level_diff: source.level as i8 - target.level as i8,
        offset: [0, 1, 2].map(|d| (source_centre[d] - target_centre[d]) as i8),
    }
}

impl<Scalar, Kern> InteractionExecutor for ChebFmm<Scalar, Kern>
where
    Scalar: RlstScalar<Real = Scalar> + Float + Default + Pod,
    Kern: KernelMetadata<T = Scalar>,
{
    type Descriptor = SetupDescriptor<Scalar>;

    fn setup(
        &self,
        level: u32,
        category: InteractionCategory,
    ) -> Result<SetupDescriptor<Scalar>, FmmError> {
        let tree = &self.tree;
        let mut pairs: BTreeMap<ConfigKey, (Vec<usize>, Vec<usize>)> = BTreeMap::new();
        let push = |pairs: &mut BTreeMap<ConfigKey, (Vec<usize>, Vec<usize>)>,
                        source: usize,
                        target: usize| {
            let config = relative_config(&tree.node(target).key, &tree.node(source).key);
            let entry = pairs.entry(config).or_default();
            entry.0.push(source);
            entry.1.push(target);
        };

        for &target in tree.level_nodes(level) {
            let target_key = tree.node(target).key;
            match category {
                // Adjacent leaves of a leaf target, self included. Under 2:1
                // balance the sources span at most one level either way: an
                // adjacent child of a colleague is necessarily a leaf, and a
                // coarser leaf adjacent to this target forces the target to
                // be a leaf too.
                InteractionCategory::NearField => {
                    if !tree.node(target).leaf {
                        continue;
                    }
                    push(&mut pairs, target, target);
                    for neighbor_key in target_key.neighbors() {
                        let Some(neighbor) = tree.index_of(&neighbor_key) else {
                            continue;
                        };
                        if tree.node(neighbor).leaf {
                            push(&mut pairs, neighbor, target);
                        } else {
                            for child_key in neighbor_key.children() {
                                if child_key.is_adjacent(&target_key) {
                                    if let Some(child) = tree.index_of(&child_key) {
                                        push(&mut pairs, child, target);
                                    }
                                }
                            }
                        }
                    }
                    if level > 0 {
                        for coarse_key in target_key.parent().neighbors() {
                            if let Some(coarse) = tree.index_of(&coarse_key) {
                                if tree.node(coarse).leaf && coarse_key.is_adjacent(&target_key) {
                                    push(&mut pairs, coarse, target);
                                }
                            }
                        }
                    }
                }

                // Non-adjacent children of the parent's colleagues.
                InteractionCategory::SameLevel => {
                    if level < 2 {
                        continue;
                    }
                    for colleague_key in target_key.parent().neighbors() {
                        let Some(colleague) = tree.index_of(&colleague_key) else {
                            continue;
                        };
                        if tree.node(colleague).leaf {
                            continue;
                        }
                        for child_key in colleague_key.children() {
                            if !child_key.is_adjacent(&target_key) {
                                if let Some(child) = tree.index_of(&child_key) {
                                    push(&mut pairs, child, target);
                                }
                            }
                        }
                    }
                }

                // Non-adjacent children of a leaf target's own colleagues.
                InteractionCategory::Upward => {
                    if !tree.node(target).leaf {
                        continue;
                    }
                    for neighbor_key in target_key.neighbors() {
                        let Some(neighbor) = tree.index_of(&neighbor_key) else {
                            continue;
                        };
                        if tree.node(neighbor).leaf {
                            continue;
                        }
                        for child_key in neighbor_key.children() {
                            if !child_key.is_adjacent(&target_key) {
                                if let Some(child) = tree.index_of(&child_key) {
                                    push(&mut pairs, child, target);
                                }
                            }
                        }
                    }
                }

                // Leaf colleagues of the parent that do not touch the target.
                InteractionCategory::Downward => {
                    if level < 2 {
                        continue;
                    }
                    for coarse_key in target_key.parent().neighbors() {
                        if let Some(coarse) = tree.index_of(&coarse_key) {
                            if tree.node(coarse).leaf && !coarse_key.is_adjacent(&target_key) {
                                push(&mut pairs, coarse, target);
                            }
                        }
                    }
                }
            }
        }

        let mut groups = Vec::with_capacity(pairs.len());
        for (config, (sources, targets)) in pairs {
            let operator =
                self.cache
                    .operator(level, OperatorTag::Interaction(category), config)?;
            groups.push(ConfigGroup {
                config,
                operator,
                sources,
                targets,
            });
        }
        Ok(SetupDescriptor {
            level,
            category,
            groups,
        })
    }

    fn execute(
        &mut self,
        descriptor: &SetupDescriptor<Scalar>,
        backend: ExecutionBackend,
    ) -> Result<(), FmmError> {
        let n = self.n_coeffs;
        let workspace_cap = self.workspace_cap;
        let multipoles = &self.multipoles;

        // Batched products in parallel, everything else streamed pair by
        // pair during the serial scatter. The scatter runs in group order,
        // so groups sharing a target accumulate identically on every call;
        // streaming keeps the capped path's extra memory at one vector
        // instead of a whole product buffer.
        let products: Vec<Option<Vec<Scalar>>> = descriptor
            .groups
            .par_iter()
            .map(|group| match backend {
                ExecutionBackend::Reference => None,
                ExecutionBackend::Batched => {
                    let workspace = n * group.sources.len() * std::mem::size_of::<Scalar>();
                    if workspace > workspace_cap {
                        log::debug!(
                            "{}",
                            FmmError::BackendUnavailable(format!(
                                "{:?} group {:?} needs a {} byte gather workspace",
                                descriptor.category, group.config, workspace
                            ))
                        );
                        None
                    } else {
                        let gathered = gather_columns(multipoles, n, &group.sources);
                        let product = empty_array::<Scalar, 2>()
                            .simple_mult_into_resize(group.operator.view(), gathered.view());
                        Some(product.data().to_vec())
                    }
                }
            })
            .collect();

        let destination = match descriptor.category {
            InteractionCategory::NearField | InteractionCategory::Upward => &mut self.direct,
            InteractionCategory::SameLevel | InteractionCategory::Downward => &mut self.locals,
        };
        for (group, product) in descriptor.groups.iter().zip(products) {
            match product {
                Some(product) => scatter_accumulate(&product, n, &group.targets, destination),
                None => apply_pairwise(group, multipoles, n, destination),
            }
        }
        Ok(())
    }
}

/// Per-pair operator application in the group's pair order, accumulating
/// straight into the target buffer one vector at a time.
fn apply_pairwise<Scalar>(
    group: &ConfigGroup<Scalar>,
    multipoles: &[Scalar],
    n_coeffs: usize,
    destination: &mut [Scalar],
) where
    Scalar: RlstScalar<Real = Scalar> + Float,
{
    for (&source, &target) in group.sources.iter().zip(group.targets.iter()) {
        let source_vector = rlst_array_from_slice2!(
            &multipoles[source * n_coeffs..(source + 1) * n_coeffs],
            [n_coeffs, 1]
        );
        let applied = empty_array::<Scalar, 2>()
            .simple_mult_into_resize(group.operator.view(), source_vector.view());
        let out = &mut destination[target * n_coeffs..(target + 1) * n_coeffs];
        for (accumulated, &value) in out.iter_mut().zip(applied.data().iter()) {
            *accumulated = *accumulated + value;
        }
    }
}

#[cfg(test)]
mod test {
    extern crate blas_src;
    extern crate lapack_src;

    use std::collections::HashMap;
    use std::sync::Arc;

    use approx::assert_relative_eq;
    use green_kernels::laplace_3d::Laplace3dKernel;
    use rlst::{rlst_dynamic_array2, RawAccessMut};

    use super::*;
    use crate::fmm::builder::ChebFmmBuilder;
    use crate::tree::helpers::{random_density, refined_octant_leaves};
    use crate::tree::types::{Domain, Octree};

    #[test]
    fn test_relative_config() {
        let target = BoxKey::new(2, [1, 1, 1]);
        assert_eq!(
            relative_config(&target, &BoxKey::new(2, [3, 1, 0])),
            ConfigKey {
                level_diff: 0,
                offset: [4, 0, -2]
            }
        );
        assert_eq!(
            relative_config(&target, &BoxKey::new(3, [4, 2, 2])),
            ConfigKey {
                level_diff: 1,
                offset: [3, 1, 1]
            }
        );
        assert_eq!(
            relative_config(&BoxKey::new(3, [4, 2, 2]), &BoxKey::new(2, [0, 1, 1])),
            ConfigKey {
                level_diff: -1,
                offset: [-7, 1, 1]
            }
        );
    }

    // Every ordered (target leaf, source leaf) pair must be covered exactly
    // once across the four categories, counting a well-separated node pair
    // as covering all leaf pairs beneath it.
    fn assert_leaf_pairs_partitioned(tree: Octree<f64>) {
        let fmm = ChebFmmBuilder::new()
            .tree(tree)
            .parameters(2, Laplace3dKernel::new())
            .build()
            .unwrap();
        let tree = &fmm.tree;

        let mut coverage: HashMap<(usize, usize), u32> = HashMap::new();
        for descriptor in fmm.descriptors.values() {
            for group in &descriptor.groups {
                for (&source, &target) in group.sources.iter().zip(group.targets.iter()) {
                    let source_leaves = match descriptor.category {
                        InteractionCategory::NearField | InteractionCategory::Downward => {
                            vec![source]
                        }
                        _ => tree.descendant_leaves(source),
                    };
                    let target_leaves = match descriptor.category {
                        InteractionCategory::NearField | InteractionCategory::Upward => {
                            vec![target]
                        }
                        _ => tree.descendant_leaves(target),
                    };
                    for &target_leaf in &target_leaves {
                        for &source_leaf in &source_leaves {
                            *coverage.entry((target_leaf, source_leaf)).or_default() += 1;
                        }
                    }
                }
            }
        }

        let n_leaves = tree.leaves.len();
        assert_eq!(coverage.len(), n_leaves * n_leaves);
        assert!(coverage.values().all(|&count| count == 1));
    }

    #[test]
    fn test_categories_partition_uniform_tree() {
        assert_leaf_pairs_partitioned(Octree::uniform(Domain::unit(), 3).unwrap());
    }

    #[test]
    fn test_pairwise_application_matches_batched_scatter() {
        // A group with a repeated target accumulates the same values
        // whether the product is one batched matrix or streamed pair by
        // pair, and the streamed path needs no product buffer.
        let n = 3;
        let mut operator = rlst_dynamic_array2!(f64, [n, n]);
        operator
            .data_mut()
            .copy_from_slice(&random_density::<f64>(n * n, 23));
        let group = ConfigGroup {
            config: ConfigKey::default(),
            operator: Arc::new(operator),
            sources: vec![0, 2, 1],
            targets: vec![1, 0, 1],
        };
        let multipoles = random_density::<f64>(3 * n, 29);

        let mut streamed = vec![0.0; 3 * n];
        apply_pairwise(&group, &multipoles, n, &mut streamed);

        let gathered = gather_columns(&multipoles, n, &group.sources);
        let product = empty_array::<f64, 2>()
            .simple_mult_into_resize(group.operator.view(), gathered.view());
        let mut batched = vec![0.0; 3 * n];
        scatter_accumulate(product.data(), n, &group.targets, &mut batched);

        for (streamed, batched) in streamed.iter().zip(batched.iter()) {
            assert_relative_eq!(streamed, batched, epsilon = 1e-14);
        }
    }

    #[test]
    fn test_categories_partition_adaptive_tree() {
        let leaves = refined_octant_leaves(2);
        assert_leaf_pairs_partitioned(Octree::from_leaves(Domain::unit(), &leaves).unwrap());
    }
}
