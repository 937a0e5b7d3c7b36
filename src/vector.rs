//! Vector record type and payload validation

use crate::error::{Result, VecSimError};
use std::str::FromStr;

const F32_BYTES: usize = std::mem::size_of::<f32>();

/// A fixed-dimension float vector bound to a key.
///
/// A record can only be built through one of the validating constructors,
/// so `as_slice().len()` always equals the dimension it was built for.
#[derive(Debug, Clone, PartialEq)]
pub struct VectorRecord {
    data: Vec<f32>,
}

impl VectorRecord {
    /// Build a record from a raw payload of `dimension` native-endian f32 values.
    pub fn from_bytes(bytes: &[u8], dimension: usize) -> Result<Self> {
        if bytes.len() != dimension * F32_BYTES {
            return Err(VecSimError::InvalidVectorSize {
                dimension,
                actual_bytes: bytes.len(),
            });
        }
        let data = bytes
            .chunks_exact(F32_BYTES)
            .map(|chunk| f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Ok(Self { data })
    }

    /// Build a record from already-decoded values.
    pub fn from_slice(values: &[f32], dimension: usize) -> Result<Self> {
        if values.len() != dimension {
            return Err(VecSimError::InvalidVectorSize {
                dimension,
                actual_bytes: values.len() * F32_BYTES,
            });
        }
        Ok(Self {
            data: values.to_vec(),
        })
    }

    /// Get the dimension of the vector
    pub fn dimension(&self) -> usize {
        self.data.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.data
    }

    /// The native-endian payload this record was built from.
    pub fn to_bytes(&self) -> Vec<u8> {
        encode_floats(&self.data)
    }

    /// L2 norm, accumulated in f64.
    pub fn norm(&self) -> f64 {
        crate::distance::norm(&self.data)
    }
}

/// Unvalidated parse of a comma-separated float list, e.g. `"1.0, 2.0, 3.0"`.
///
/// The dimension check happens when the values are turned into a record.
#[derive(Debug, Clone, PartialEq)]
pub struct FloatList(pub Vec<f32>);

impl FromStr for FloatList {
    type Err = VecSimError;

    fn from_str(s: &str) -> Result<Self> {
        s.split(',')
            .map(|x| {
                x.trim()
                    .parse::<f32>()
                    .map_err(|_| VecSimError::InvalidArgument(format!("Invalid float: {}", x)))
            })
            .collect::<Result<Vec<f32>>>()
            .map(FloatList)
    }
}

/// Encode floats as a native-endian byte payload.
pub fn encode_floats(values: &[f32]) -> Vec<u8> {
    values.iter().flat_map(|v| v.to_ne_bytes()).collect()
}
