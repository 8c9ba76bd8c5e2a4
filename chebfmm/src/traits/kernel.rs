//! Kernel metadata consumed by the operator cache.
use green_kernels::traits::Kernel;

/// Spatial symmetry class of a kernel, used to prune the permutation search
/// when canonicalising interaction configurations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelSymmetry {
    /// Invariant under the full signed axis-permutation group (48 elements),
    /// e.g. any kernel depending on the pairwise distance alone.
    Radial,
    /// No declared symmetry; every configuration is its own canonical form.
    None,
}

/// Identity and invariances a kernel declares to the operator cache.
///
/// The signature keys persisted operators; two kernels with equal signatures
/// must produce bit-compatible operator matrices.
pub trait KernelMetadata
where
    Self: Kernel + Send + Sync,
{
    /// Stable identifier of this kernel (name, scalar width, parameters).
    fn signature(&self) -> String;

    /// Homogeneity degree `d` with `K(a x) = a^d K(x)`, if the kernel is
    /// homogenous. Lets the operator cache assemble interaction operators at
    /// one reference level and rescale exactly for every other level.
    fn homogeneity(&self) -> Option<i32>;

    /// Declared symmetry class
    fn symmetry(&self) -> KernelSymmetry;
}
