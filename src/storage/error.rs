//! Storage layer error types.

use crate::access::DataType;
use thiserror::Error;

/// Errors that can occur in the storage and access layers.
///
/// `TypeMismatch`, `DuplicateKey`, `NotFound`, `CapacityExceeded` and
/// `InvalidArgument` are outcomes reported back to the caller. The remaining
/// variants abort the current operation; see [`StorageError::is_fatal`].
#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Type mismatch: expected {expected:?}, found {found:?}")]
    TypeMismatch { expected: DataType, found: DataType },

    #[error("Duplicate key: {0}")]
    DuplicateKey(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Value of {len} bytes exceeds capacity of {capacity}")]
    CapacityExceeded { len: usize, capacity: usize },

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Out of range: {0}")]
    OutOfRange(String),

    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] bincode::Error),
}

impl StorageError {
    /// Whether the error invalidates the file or table it came from, as
    /// opposed to an outcome the caller is expected to handle.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            StorageError::OutOfRange(_)
                | StorageError::CorruptRecord(_)
                | StorageError::Io(_)
                | StorageError::Serialization(_)
        )
    }
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;
