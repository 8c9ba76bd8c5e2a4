//! The Chebyshev translation engine: operator construction, caching and the
//! evaluation loop.
pub mod builder;
pub mod collect;
pub mod constants;
mod eval;
pub mod exchange;
pub mod field_translation;
mod kernel;
pub mod operators;
pub mod store;
pub mod types;

pub use builder::ChebFmmBuilder;
pub use types::ChebFmm;
