//! Operation traits for the translation engine.
use crate::traits::types::{ExecutionBackend, FmmError, InteractionCategory};

/// Interface for source-side field translations.
pub trait SourceTranslation {
    /// Seed the upward-pass compressed representation of every non-ghost
    /// source leaf from its Chebyshev density coefficients. Idempotent.
    fn init_multipoles(&mut self) -> Result<(), FmmError>;

    /// Child to parent multipole translations, applied during the upward
    /// pass over each level of the tree.
    ///
    /// # Arguments
    /// * `level` - The child level at which this translation is being applied.
    fn m2m(&mut self, level: u32) -> Result<(), FmmError>;
}

/// Interface for target-side field translations.
pub trait TargetTranslation {
    /// Parent to child local translations, applied during the downward pass
    /// over each level of the tree.
    ///
    /// # Arguments
    /// * `level` - The child level at which this translation is being applied.
    fn l2l(&mut self, level: u32) -> Result<(), FmmError>;

    /// Convert each non-ghost leaf's accumulated local expansion, together
    /// with its directly accumulated near-field values, into output
    /// Chebyshev coefficients.
    fn evaluate_leaf_output(&mut self) -> Result<(), FmmError>;
}

/// Interface for the four interaction executors. Setup is metadata only;
/// Execute performs the batched linear transforms and accumulates into
/// target buffers.
pub trait InteractionExecutor {
    /// Backend-agnostic setup output, reusable across Execute calls for a
    /// fixed tree shape.
    type Descriptor;

    /// Enumerate source/target pairs for a category at a level, resolve
    /// operator and permutation keys, and build the gather/scatter layout.
    /// No floating point work.
    fn setup(
        &self,
        level: u32,
        category: InteractionCategory,
    ) -> Result<Self::Descriptor, FmmError>;

    /// Apply the batched translations described by a descriptor, summing
    /// into each target's accumulation buffer.
    fn execute(
        &mut self,
        descriptor: &Self::Descriptor,
        backend: ExecutionBackend,
    ) -> Result<(), FmmError>;
}

/// Interface for running a full FMM evaluation.
pub trait Evaluate {
    /// Run the upward and downward passes and write output coefficients back
    /// into the tree. Repeated calls on unchanged input produce identical
    /// output.
    fn evaluate(&mut self) -> Result<(), FmmError>;
}
