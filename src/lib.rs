//! # vecsim
//!
//! An exact cosine-similarity vector store that lives inside a host key-value
//! keyspace.
//!
//! This library provides:
//! - Fixed-dimension `f32` vector records bound to host keys
//! - Exact top-k cosine search with optional key filters
//! - Keyspace lifecycle hooks (overwrite, delete, expire, flush)
//! - DUMP/RESTORE payloads and CRC-checked snapshots
//! - Per-shard counts for cluster aggregation
//!
//! ## Example
//!
//! ```rust
//! use vecsim::{Shard, StoreConfig};
//! use vecsim::vector::encode_floats;
//!
//! let mut shard = Shard::new(StoreConfig::with_dimension(3)).unwrap();
//! shard.add("v1", &encode_floats(&[1.0, 0.0, 0.0])).unwrap();
//! shard.add("v2", &encode_floats(&[0.0, 1.0, 0.0])).unwrap();
//!
//! let response = shard.sim(1, None, &encode_floats(&[0.9, 0.1, 0.0])).unwrap();
//! assert_eq!(response.keys(), vec!["v1"]);
//! ```

pub mod cluster;
pub mod commands;
pub mod config;
pub mod distance;
pub mod error;
pub mod keyspace;
pub mod persistence;
pub mod search;
pub mod storage;
pub mod top_k;
pub mod vector;

pub use cluster::{merge_top_k, ClusterAggregator, ShardCountAdapter, SumAggregator};
pub use commands::{execute, Reply};
pub use config::StoreConfig;
pub use error::{Result, VecSimError};
pub use keyspace::Shard;
pub use persistence::{RecordCodec, SaveStats, SnapshotManager};
pub use search::{KeyFilter, SearchResponse, SearchResult, SimilarityEngine};
pub use storage::{StoreView, VectorStore};
pub use vector::VectorRecord;
