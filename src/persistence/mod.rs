//! Persistence layer: point DUMP/RESTORE payloads and bulk snapshots.

pub mod codec;
pub mod serialization;
pub mod snapshot;

pub use codec::RecordCodec;
pub use snapshot::{SaveStats, SnapshotImage, SnapshotManager};
