//! Persisted translation operators.
//!
//! One file per canonical operator, a fixed self-describing header followed
//! by the raw column-major payload. Files are keyed by everything that
//! determines the matrix bit-for-bit; a reader that finds any header field
//! disagreeing with its own configuration treats the file as a miss and
//! reassembles the operator.
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use bytemuck::Pod;
use num::Float;
use rlst::{rlst_dynamic_array2, RawAccess, RawAccessMut, RlstScalar, Shape};

use crate::fmm::constants::{STORE_MAGIC, STORE_VERSION};
use crate::fmm::types::{Matrix2, OperatorKey, OperatorTag};
use crate::traits::types::{FmmError, InteractionCategory};

/// Size in bytes of the serialised header.
const HEADER_LEN: usize = 4 + 4 + 8 + 1 + 1 + 4 + 4 + 4 + 8 + 8;

/// FNV-1a over a kernel signature. Stable across runs and platforms, unlike
/// the standard library's default hasher.
pub fn signature_hash(signature: &str) -> u64 {
    let mut hash = 0xcbf29ce484222325u64;
    for &byte in signature.as_bytes() {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

fn tag_code(tag: OperatorTag) -> u8 {
    match tag {
        OperatorTag::Interaction(InteractionCategory::NearField) => 0,
        OperatorTag::Interaction(InteractionCategory::SameLevel) => 1,
        OperatorTag::Interaction(InteractionCategory::Upward) => 2,
        OperatorTag::Interaction(InteractionCategory::Downward) => 3,
        OperatorTag::ChildToParent => 4,
        OperatorTag::ParentToChild => 5,
    }
}

/// Directory of persisted operators for one kernel/order combination.
pub struct OperatorStore {
    root: PathBuf,
    sig_hash: u64,
    order: u32,
}

impl OperatorStore {
    /// Open (creating if absent) a store rooted at `root`.
    pub fn new<P: AsRef<Path>>(root: P, signature: &str, order: usize) -> Result<Self, FmmError> {
        fs::create_dir_all(root.as_ref())?;
        Ok(OperatorStore {
            root: root.as_ref().to_path_buf(),
            sig_hash: signature_hash(signature),
            order: order as u32,
        })
    }

    fn path(&self, key: &OperatorKey) -> PathBuf {
        let name = format!(
            "{:016x}_n{}_t{}_l{}_d{}_{}_{}_{}.cbop",
            self.sig_hash,
            self.order,
            tag_code(key.tag),
            key.level,
            key.config.level_diff,
            key.config.offset[0],
            key.config.offset[1],
            key.config.offset[2],
        );
        self.root.join(name)
    }

    fn header<T: RlstScalar>(&self, key: &OperatorKey, shape: [usize; 2]) -> Vec<u8> {
        let mut header = Vec::with_capacity(HEADER_LEN);
        header.extend_from_slice(&STORE_MAGIC);
        header.extend_from_slice(&STORE_VERSION.to_le_bytes());
        header.extend_from_slice(&self.sig_hash.to_le_bytes());
        header.push(std::mem::size_of::<T>() as u8);
        header.push(tag_code(key.tag));
        header.extend_from_slice(&key.level.to_le_bytes());
        let config = [
            key.config.level_diff as u8,
            key.config.offset[0] as u8,
            key.config.offset[1] as u8,
            key.config.offset[2] as u8,
        ];
        header.extend_from_slice(&config);
        header.extend_from_slice(&self.order.to_le_bytes());
        header.extend_from_slice(&(shape[0] as u64).to_le_bytes());
        header.extend_from_slice(&(shape[1] as u64).to_le_bytes());
        header
    }

    /// Persist an operator. Overwrites any existing file for the key.
    pub fn save<T>(&self, key: &OperatorKey, operator: &Matrix2<T>) -> Result<(), FmmError>
    where
        T: RlstScalar<Real = T> + Float + Pod,
    {
        let mut file = fs::File::create(self.path(key))?;
        file.write_all(&self.header::<T>(key, operator.shape()))?;
        file.write_all(bytemuck::cast_slice(operator.data()))?;
        Ok(())
    }

    /// Load an operator, or `None` when the file is absent or its header
    /// does not match this store's configuration exactly.
    pub fn load<T>(&self, key: &OperatorKey) -> Option<Matrix2<T>>
    where
        T: RlstScalar<Real = T> + Float + Pod,
    {
        let path = self.path(key);
        let mut file = fs::File::open(&path).ok()?;

        let mut header = [0u8; HEADER_LEN];
        file.read_exact(&mut header).ok()?;

        // Compare everything up to the shape, which the reader does not know
        // ahead of time.
        let expected = self.header::<T>(key, [0, 0]);
        if header[..HEADER_LEN - 16] != expected[..HEADER_LEN - 16] {
            log::debug!("stale operator file ignored: {}", path.display());
            return None;
        }

        let rows = u64::from_le_bytes(header[HEADER_LEN - 16..HEADER_LEN - 8].try_into().ok()?);
        let cols = u64::from_le_bytes(header[HEADER_LEN - 8..].try_into().ok()?);
        let (rows, cols) = (rows as usize, cols as usize);

        let mut payload = vec![0u8; rows * cols * std::mem::size_of::<T>()];
        file.read_exact(&mut payload).ok()?;
        let values: &[T] = bytemuck::try_cast_slice(&payload).ok()?;

        let mut operator = rlst_dynamic_array2!(T, [rows, cols]);
        operator.data_mut().copy_from_slice(values);
        Some(operator)
    }
}
