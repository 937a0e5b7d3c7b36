//! Store configuration: the fixed dimension and scan/persistence settings.

use crate::error::{Result, VecSimError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Dimension used by the seeding and query tooling.
pub const DEFAULT_DIMENSION: usize = 128;

/// Candidate count at which a search fans out over the rayon pool.
pub const DEFAULT_PARALLEL_SCAN_THRESHOLD: usize = 65_536;

/// Configuration for one shard's vector store.
///
/// The dimension is fixed for the lifetime of a [`Shard`](crate::keyspace::Shard);
/// every record and every query must carry exactly `dimension` floats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Number of f32 components per vector.
    pub dimension: usize,
    /// Scan in parallel once this many candidates are resident.
    pub parallel_scan_threshold: usize,
    /// Directory holding the snapshot and its manifest.
    pub data_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dimension: DEFAULT_DIMENSION,
            parallel_scan_threshold: DEFAULT_PARALLEL_SCAN_THRESHOLD,
            data_dir: PathBuf::from("data"),
        }
    }
}

impl StoreConfig {
    /// Default configuration with the given dimension.
    pub fn with_dimension(dimension: usize) -> Self {
        Self {
            dimension,
            ..Self::default()
        }
    }

    /// Load a configuration from a JSON file. Missing fields take their defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let bytes = std::fs::read(path.as_ref())?;
        let config: StoreConfig = serde_json::from_slice(&bytes)
            .map_err(|e| VecSimError::Config(format!("{}: {}", path.as_ref().display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Byte length of one encoded vector.
    pub fn vector_bytes(&self) -> usize {
        self.dimension * std::mem::size_of::<f32>()
    }

    pub fn validate(&self) -> Result<()> {
        if self.dimension == 0 {
            return Err(VecSimError::Config("dimension must be positive".to_string()));
        }
        if self.parallel_scan_threshold == 0 {
            return Err(VecSimError::Config(
                "parallel_scan_threshold must be positive".to_string(),
            ));
        }
        Ok(())
    }
}
