//! Error types for the replication driver.

use thiserror::Error;

/// Errors surfaced by the replication driver.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A store-layer failure (bad batch arithmetic, serialization).
    #[error(transparent)]
    Db(#[from] plotsync_db::DbError),

    /// A transport-layer failure (only the listener bind reaches callers;
    /// per-connection errors stay inside the transport).
    #[error(transparent)]
    Net(#[from] plotsync_net::NetError),

    /// The shared plot store mutex was poisoned by a panicking writer.
    #[error("plot store lock poisoned")]
    StorePoisoned,
}

/// Convenience result type for replication driver operations.
pub type Result<T> = std::result::Result<T, CoreError>;
