//! Arena-based octrees over cubic domains.
pub mod helpers;
pub mod key;
pub mod octree;
pub mod types;
