//! End-to-end tests for the plot replication network.
//!
//! Each scenario builds a small cluster of complete in-process nodes and
//! drives their cooperative loops deterministically:
//!
//! 1. **Replication** — quiet nodes, multi-node convergence under clock
//!    skew, corrupt payload rejection, reconciliation stability.
//! 2. **Protocol** — handshake failures: wrong challenge echoes,
//!    mismatched keys, garbage connections.

pub mod harness;


#[cfg(test)]
mod protocol_tests;
