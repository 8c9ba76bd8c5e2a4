//! Crate level constants.

/// Default cap in bytes on a single gather workspace of the batched
/// execution backend.
pub const DEFAULT_WORKSPACE_CAP: usize = 1 << 28;

/// Magic bytes opening every persisted operator file.
pub const STORE_MAGIC: [u8; 4] = *b"CBOP";

/// Version of the persisted operator layout.
pub const STORE_VERSION: u32 = 1;

/// Order of the signed axis-permutation symmetry group of the cube.
pub const N_SYMMETRIES: usize = 48;
