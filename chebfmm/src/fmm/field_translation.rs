//! The translation passes of the evaluation loop.
pub mod source;
pub mod source_to_target;
pub mod target;
