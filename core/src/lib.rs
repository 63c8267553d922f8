//! The replication driver for a drone plot node.
//!
//! Glues the transport layer to the plot store: [`repl_server::ReplServer`]
//! runs the cooperative loop that exchanges plots with every peer and keeps
//! the local store reconciled.

pub mod error;
pub mod repl_server;

pub use {
    error::CoreError,
    repl_server::ReplServer,
};
