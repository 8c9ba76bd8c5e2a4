//! # Chebyshev black-box FMM translation engine
//!
//! A translation engine for the black-box fast multipole method of \[1\]
//! over 2:1 balanced octrees. Source densities and output fields are
//! tensor-product Chebyshev expansions on each leaf; every translation
//! operator is a dense kernel matrix between box grids, deduplicated by
//! relative configuration, reduced further by the symmetry group of the
//! kernel and reusable across levels for homogeneous kernels.
//!
//! Notable features of this library are:
//! * Four interaction categories covering every ordered pair of leaves
//!   exactly once, executed per level with a choice of a pair-by-pair or a
//!   batched BLAS backend.
//! * An on-disk operator store and a pluggable exchange for cooperating
//!   engine instances.
//! * A trait based interface for alternative kernels via [`traits::kernel::KernelMetadata`].
//!
//! ## References
//! \[1\] Fong, W., & Darve, E. (2009). The black-box fast multipole method. Journal of Computational Physics, 228(23), 8712-8725.
#![cfg_attr(feature = "strict", deny(warnings))]
#![warn(missing_docs)]

pub mod cheb;
pub mod fmm;
pub mod traits;
pub mod tree;

// Public API
#[doc(inline)]
pub use fmm::builder::ChebFmmBuilder;
#[doc(inline)]
pub use fmm::types::ChebFmm;
#[doc(inline)]
pub use traits::fmm::Evaluate;
#[doc(inline)]
pub use traits::types::{ExecutionBackend, FmmError, InteractionCategory};
#[doc(inline)]
pub use tree::types::{Domain, Octree};
