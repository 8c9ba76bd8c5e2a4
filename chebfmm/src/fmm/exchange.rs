//! Seam for sharing assembled operators between cooperating engine
//! instances.
//!
//! The operator cache consults an exchange during population only: a
//! builder participant assembles canonical operators and publishes their
//! serialized bytes, a non-builder receives them instead of assembling.
//! Execution never communicates. The in-crate [`LocalExchange`] is the
//! single-process no-op implementation.
use bytemuck::Pod;
use num::Float;
use rlst::{rlst_dynamic_array2, RawAccess, RawAccessMut, RlstScalar, Shape};

use crate::fmm::types::{Matrix2, OperatorKey};
use crate::traits::types::FmmError;

/// Operator transport used while the cache is populated.
pub trait OperatorExchange {
    /// Whether this participant assembles operators itself.
    fn is_builder(&self) -> bool;

    /// Publish a freshly assembled canonical operator.
    fn publish(&self, key: &OperatorKey, bytes: &[u8]) -> Result<(), FmmError>;

    /// Fetch a canonical operator assembled by the builder participant.
    fn fetch(&self, key: &OperatorKey) -> Result<Option<Vec<u8>>, FmmError>;
}

/// Single-process exchange: assembles everything, shares nothing.
#[derive(Default)]
pub struct LocalExchange;

impl OperatorExchange for LocalExchange {
    fn is_builder(&self) -> bool {
        true
    }

    fn publish(&self, _key: &OperatorKey, _bytes: &[u8]) -> Result<(), FmmError> {
        Ok(())
    }

    fn fetch(&self, _key: &OperatorKey) -> Result<Option<Vec<u8>>, FmmError> {
        Ok(None)
    }
}

/// Serialize an operator for transport: two little-endian `u64` dimensions
/// followed by the raw column-major payload.
pub fn encode_operator<T>(operator: &Matrix2<T>) -> Vec<u8>
where
    T: RlstScalar<Real = T> + Float + Pod,
{
    let [rows, cols] = operator.shape();
    let mut bytes = Vec::with_capacity(16 + rows * cols * std::mem::size_of::<T>());
    bytes.extend_from_slice(&(rows as u64).to_le_bytes());
    bytes.extend_from_slice(&(cols as u64).to_le_bytes());
    bytes.extend_from_slice(bytemuck::cast_slice(operator.data()));
    bytes
}

/// Inverse of [`encode_operator`].
pub fn decode_operator<T>(bytes: &[u8]) -> Result<Matrix2<T>, FmmError>
where
    T: RlstScalar<Real = T> + Float + Pod,
{
    if bytes.len() < 16 {
        return Err(FmmError::Failed(
            "operator transport message too short".to_string(),
        ));
    }
    let rows = u64::from_le_bytes(bytes[..8].try_into().unwrap()) as usize;
    let cols = u64::from_le_bytes(bytes[8..16].try_into().unwrap()) as usize;
    let payload = &bytes[16..];
    if payload.len() != rows * cols * std::mem::size_of::<T>() {
        return Err(FmmError::Failed(format!(
            "operator transport payload of {} bytes does not fit a {} by {} matrix",
            payload.len(),
            rows,
            cols
        )));
    }
    let values: &[T] = bytemuck::try_cast_slice(payload)
        .map_err(|_| FmmError::Failed("misaligned operator transport payload".to_string()))?;
    let mut operator = rlst_dynamic_array2!(T, [rows, cols]);
    operator.data_mut().copy_from_slice(values);
    Ok(operator)
}
