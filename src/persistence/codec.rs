//! Point serialization of a single record (the DUMP/RESTORE payload).
//!
//! Payload layout: `bincode(PointFrame)` followed by a little-endian CRC32.

use crate::error::{Result, VecSimError};
use crate::persistence::serialization::{from_bincode, seal, to_bincode, unseal};
use crate::vector::VectorRecord;
use serde::{Deserialize, Serialize};

/// Type tag carried by every serialized record.
pub const TYPE_NAME: &str = "vecsim-vf";

/// Bumped whenever the frame layout changes.
pub const ENCODING_VERSION: u32 = 1;

/// Serialization hooks a value type registers with the host.
///
/// Freeing is `Drop`.
pub trait RecordCodec: Sized {
    /// Encode into an opaque, self-describing payload.
    fn encode(&self) -> Result<Vec<u8>>;

    /// Decode a payload produced by [`RecordCodec::encode`], checking it
    /// against the configured dimension.
    fn decode(payload: &[u8], dimension: usize) -> Result<Self>;
}

#[derive(Debug, Serialize, Deserialize)]
struct PointFrame {
    type_name: String,
    encoding_version: u32,
    dimension: u32,
    data: Vec<u8>,
}

impl RecordCodec for VectorRecord {
    fn encode(&self) -> Result<Vec<u8>> {
        let frame = PointFrame {
            type_name: TYPE_NAME.to_string(),
            encoding_version: ENCODING_VERSION,
            dimension: self.dimension() as u32,
            data: self.to_bytes(),
        };
        Ok(seal(to_bincode(&frame)?))
    }

    fn decode(payload: &[u8], dimension: usize) -> Result<Self> {
        let frame: PointFrame = from_bincode(unseal(payload)?)?;
        if frame.type_name != TYPE_NAME {
            return Err(VecSimError::CorruptPayload(format!(
                "unexpected type tag '{}'",
                frame.type_name
            )));
        }
        if frame.encoding_version > ENCODING_VERSION {
            return Err(VecSimError::CorruptPayload(format!(
                "unsupported encoding version {}",
                frame.encoding_version
            )));
        }
        decode_raw(frame.dimension, &frame.data, dimension)
    }
}

/// Rebuild a record from a declared dimension and its raw float bytes.
///
/// Shared by RESTORE and snapshot load so both enforce the same checks.
pub fn decode_raw(declared_dimension: u32, data: &[u8], dimension: usize) -> Result<VectorRecord> {
    if declared_dimension as usize != dimension {
        return Err(VecSimError::CorruptPayload(format!(
            "declared dimension {} does not match configured dimension {}",
            declared_dimension, dimension
        )));
    }
    VectorRecord::from_bytes(data, dimension)
}
