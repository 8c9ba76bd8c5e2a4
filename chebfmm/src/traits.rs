//! Trait definitions for the translation engine and its collaborators.
pub mod fmm;
pub mod kernel;
pub mod types;
