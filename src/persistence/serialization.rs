//! Serialization utilities: bincode for records and snapshots, JSON for the
//! manifest, CRC32 framing for anything written to disk or handed to clients.

use crate::error::{Result, VecSimError};
use serde::{Deserialize, Serialize};
use std::io::{self, Write};

const CRC_LEN: usize = 4;

/// Encode data to bincode bytes.
pub fn to_bincode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    bincode::serialize(value).map_err(|e| VecSimError::SerializationError(e.to_string()))
}

/// Decode data from bincode bytes.
pub fn from_bincode<'a, T: Deserialize<'a>>(bytes: &'a [u8]) -> Result<T> {
    bincode::deserialize(bytes).map_err(|e| VecSimError::CorruptPayload(e.to_string()))
}

/// Encode data to pretty JSON bytes.
pub fn to_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec_pretty(value).map_err(|e| VecSimError::SerializationError(e.to_string()))
}

/// Append a little-endian CRC32 of `frame`.
pub fn seal(mut frame: Vec<u8>) -> Vec<u8> {
    let crc = crc32fast::hash(&frame);
    frame.extend_from_slice(&crc.to_le_bytes());
    frame
}

/// Verify and strip the trailing CRC32 added by [`seal`].
pub fn unseal(bytes: &[u8]) -> Result<&[u8]> {
    if bytes.len() < CRC_LEN {
        return Err(VecSimError::CorruptPayload(format!(
            "payload too short ({} bytes)",
            bytes.len()
        )));
    }
    let (body, trailer) = bytes.split_at(bytes.len() - CRC_LEN);
    let expected = u32::from_le_bytes([trailer[0], trailer[1], trailer[2], trailer[3]]);
    let actual = crc32fast::hash(body);
    if actual != expected {
        return Err(VecSimError::CorruptPayload(format!(
            "checksum mismatch (expected {:08x}, got {:08x})",
            expected, actual
        )));
    }
    Ok(body)
}

/// Writer that checksums everything passing through it.
pub struct CrcWriter<W: Write> {
    inner: W,
    hasher: crc32fast::Hasher,
    written: u64,
}

impl<W: Write> CrcWriter<W> {
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            hasher: crc32fast::Hasher::new(),
            written: 0,
        }
    }

    /// Write the CRC32 trailer and hand back the inner writer and total bytes.
    pub fn finish(mut self) -> io::Result<(W, u64)> {
        let crc = self.hasher.finalize();
        self.inner.write_all(&crc.to_le_bytes())?;
        Ok((self.inner, self.written + CRC_LEN as u64))
    }
}

impl<W: Write> Write for CrcWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.inner.write(buf)?;
        self.hasher.update(&buf[..n]);
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
