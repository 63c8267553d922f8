//! Error types for the plot store and wire serialization.

use thiserror::Error;

/// Errors that can occur in the plot database layer.
#[derive(Error, Debug)]
pub enum DbError {
    /// A record failed to serialize or deserialize.
    #[error("record serialization error: {0}")]
    Serialization(#[from] bincode::Error),

    /// A replication batch is too short to carry its count prefix, or its
    /// payload is not a whole number of records.
    #[error("batch of {len} bytes is not a u32 count plus a multiple of {record_size}")]
    BadBatchLength {
        /// Total batch length including the count prefix.
        len: usize,
        /// Fixed wire width of one record.
        record_size: usize,
    },

    /// The count prefix disagrees with the number of records present.
    #[error("batch count {count} disagrees with a payload of {payload} bytes")]
    CountMismatch {
        /// Count read from the 4-byte prefix.
        count: u32,
        /// Payload length after the prefix.
        payload: usize,
    },
}

/// Convenience result type for plot database operations.
pub type Result<T> = std::result::Result<T, DbError>;
