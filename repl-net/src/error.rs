//! Error types for the replication transport layer.

use thiserror::Error;

/// Errors that can occur in the replication transport.
///
/// Everything except [`NetError::Key`] and a failed listener bind is fatal
/// to a single connection only: the connection is logged and dropped, the
/// node's loop continues.
#[derive(Error, Debug)]
pub enum NetError {
    /// Transport-level I/O error.
    #[error("socket error: {0}")]
    Socket(#[from] std::io::Error),

    /// The remote end closed the connection mid-exchange.
    #[error("connection closed by peer")]
    Disconnected,

    /// A frame was missing its tags or otherwise malformed.
    #[error("malformed frame: {0}")]
    Format(String),

    /// An encrypted envelope could not be opened.
    #[error("crypto envelope error: {0}")]
    Crypto(String),

    /// The peer's challenge echo did not match the challenge we issued.
    #[error("auth mismatch")]
    AuthMismatch,

    /// The shared key file could not be loaded. Startup-fatal.
    #[error("key file {path}: {reason}")]
    Key {
        /// Path that was attempted.
        path: String,
        /// Why loading failed.
        reason: String,
    },
}

/// Convenience result type for replication transport operations.
pub type Result<T> = std::result::Result<T, NetError>;
