//! Snapshot: save/load every resident record to/from disk.
//!
//! File layout:
//!
//! ```text
//! [bincode(SnapshotHeader)][bincode(SnapshotEntry)] * count [crc32: u32 LE]
//! ```
//!
//! The file is written to a temporary path and renamed into place, so a crash
//! mid-save leaves the previous snapshot intact.

use crate::error::{Result, VecSimError};
use crate::persistence::serialization::{self, CrcWriter};
use crate::storage::StoreView;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::time::{Instant, SystemTime, UNIX_EPOCH};

const MAGIC: [u8; 4] = *b"VSNP";

/// Bumped whenever the snapshot layout changes.
pub const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct SnapshotHeader {
    magic: [u8; 4],
    format_version: u32,
    dimension: u32,
    count: u64,
}

/// One record as stored in a snapshot.
#[derive(Debug, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub key: String,
    pub dimension: u32,
    pub data: Vec<u8>,
    /// Absolute expiry in unix milliseconds.
    pub expires_at_ms: Option<u64>,
}

/// A point-in-time image of a shard, ready to be written.
#[derive(Debug, Clone)]
pub struct SnapshotImage {
    view: StoreView,
    expires_at_ms: HashMap<String, u64>,
}

impl SnapshotImage {
    pub fn new(view: StoreView, expires_at_ms: HashMap<String, u64>) -> Self {
        Self {
            view,
            expires_at_ms,
        }
    }

    pub fn len(&self) -> usize {
        self.view.len()
    }

    pub fn is_empty(&self) -> bool {
        self.view.is_empty()
    }

    /// Serialize the image into `writer`. Returns the number of bytes written.
    pub fn write_to<W: Write>(&self, writer: W) -> Result<u64> {
        let mut out = CrcWriter::new(writer);
        let header = SnapshotHeader {
            magic: MAGIC,
            format_version: FORMAT_VERSION,
            dimension: self.view.dimension() as u32,
            count: self.view.len() as u64,
        };
        bincode::serialize_into(&mut out, &header)
            .map_err(|e| VecSimError::SerializationError(e.to_string()))?;

        for (key, values) in self.view.iter() {
            let entry = SnapshotEntry {
                key: key.to_string(),
                dimension: values.len() as u32,
                data: crate::vector::encode_floats(values),
                expires_at_ms: self.expires_at_ms.get(key).copied(),
            };
            bincode::serialize_into(&mut out, &entry)
                .map_err(|e| VecSimError::SerializationError(e.to_string()))?;
        }

        let (mut inner, written) = out.finish()?;
        inner.flush()?;
        Ok(written)
    }
}

/// Walk a snapshot buffer, handing each entry to `sink`.
///
/// The checksum and header are verified before the first entry is yielded;
/// any error, including one returned by `sink`, aborts the walk.
pub fn read_entries<F>(bytes: &[u8], dimension: usize, mut sink: F) -> Result<u64>
where
    F: FnMut(SnapshotEntry) -> Result<()>,
{
    let mut body = serialization::unseal(bytes)?;

    let header: SnapshotHeader = bincode::deserialize_from(&mut body)
        .map_err(|e| VecSimError::CorruptPayload(format!("snapshot header: {}", e)))?;
    if header.magic != MAGIC {
        return Err(VecSimError::CorruptPayload("not a vector snapshot".to_string()));
    }
    if header.format_version > FORMAT_VERSION {
        return Err(VecSimError::CorruptPayload(format!(
            "unsupported snapshot format version {}",
            header.format_version
        )));
    }
    if header.dimension as usize != dimension {
        return Err(VecSimError::CorruptPayload(format!(
            "snapshot dimension {} does not match configured dimension {}",
            header.dimension, dimension
        )));
    }

    for i in 0..header.count {
        let entry: SnapshotEntry = bincode::deserialize_from(&mut body)
            .map_err(|e| VecSimError::CorruptPayload(format!("snapshot entry {}: {}", i, e)))?;
        sink(entry)?;
    }

    if !body.is_empty() {
        return Err(VecSimError::CorruptPayload(format!(
            "{} trailing bytes after last entry",
            body.len()
        )));
    }
    Ok(header.count)
}

/// Outcome of a snapshot save.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SaveStats {
    pub records: usize,
    pub bytes: u64,
}

/// Manages saving and loading snapshots in a data directory.
#[derive(Debug, Clone)]
pub struct SnapshotManager {
    dir: PathBuf,
}

impl SnapshotManager {
    /// Create a snapshot manager for the given directory.
    pub fn new(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.dir.join("vectors.snap")
    }

    fn temp_path(&self) -> PathBuf {
        self.dir.join("vectors.snap.tmp")
    }

    fn manifest_path(&self) -> PathBuf {
        self.dir.join("manifest.json")
    }

    /// Write `image` to disk, replacing any previous snapshot.
    pub fn save(&self, image: &SnapshotImage) -> Result<SaveStats> {
        let start = Instant::now();
        let tmp = self.temp_path();

        let file = File::create(&tmp)?;
        let mut writer = BufWriter::new(file);
        let bytes = image.write_to(&mut writer)?;
        let file = writer
            .into_inner()
            .map_err(|e| VecSimError::IoError(e.into_error()))?;
        file.sync_all()?;
        fs::rename(&tmp, self.snapshot_path())?;

        // Manifest (JSON) for human-readable metadata
        let manifest = serde_json::json!({
            "record_count": image.len(),
            "dimension": image.view.dimension(),
            "format_version": FORMAT_VERSION,
            "bytes": bytes,
            "saved_at_ms": unix_millis(SystemTime::now()),
        });
        fs::write(self.manifest_path(), serialization::to_json(&manifest)?)?;

        tracing::info!(
            records = image.len(),
            bytes,
            path = %self.snapshot_path().display(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "snapshot saved"
        );

        Ok(SaveStats {
            records: image.len(),
            bytes,
        })
    }

    /// Feed every entry of the on-disk snapshot to `sink`.
    ///
    /// Returns `None` when no snapshot exists.
    pub fn load<F>(&self, dimension: usize, sink: F) -> Result<Option<u64>>
    where
        F: FnMut(SnapshotEntry) -> Result<()>,
    {
        let path = self.snapshot_path();
        if !path.exists() {
            return Ok(None);
        }

        let start = Instant::now();
        let file = File::open(&path)?;
        // Fall back to a plain read when the file cannot be mapped (e.g. empty).
        let count = match unsafe { memmap2::Mmap::map(&file) } {
            Ok(mmap) => read_entries(&mmap, dimension, sink)?,
            Err(_) => read_entries(&fs::read(&path)?, dimension, sink)?,
        };

        tracing::info!(
            records = count,
            path = %path.display(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "snapshot loaded"
        );
        Ok(Some(count))
    }

    /// Check if a snapshot exists.
    pub fn exists(&self) -> bool {
        self.snapshot_path().exists()
    }
}

/// Milliseconds since the unix epoch.
pub fn unix_millis(at: SystemTime) -> u64 {
    at.duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}
