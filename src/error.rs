//! Error types for the vector store

use thiserror::Error;

/// Result type alias for vecsim operations
pub type Result<T> = std::result::Result<T, VecSimError>;

/// Error types that can occur in vecsim operations
#[derive(Error, Debug)]
pub enum VecSimError {
    /// Payload length is not `dimension * 4` bytes.
    #[error("given blob is not a float vector of size {dimension}")]
    InvalidVectorSize { dimension: usize, actual_bytes: usize },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("corrupt payload: {0}")]
    CorruptPayload(String),

    #[error("target key name already exists")]
    BusyKey,

    #[error("operation against a key holding the wrong kind of value")]
    WrongType,

    /// A TTL too large to turn into a deadline.
    #[error("invalid expire time")]
    InvalidExpireTime,

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),
}
