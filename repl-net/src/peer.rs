//! The static peer table.
//!
//! Membership is fixed for the lifetime of the node: a map from node
//! identifier to network address, loaded once from configuration.
//! Iteration order is deterministic so replication rounds dial peers in a
//! stable order.

use std::{collections::BTreeMap, net::SocketAddr};

/// Static map of replication peers.
#[derive(Debug, Clone, Default)]
pub struct PeerTable {
    peers: BTreeMap<String, SocketAddr>,
}

impl PeerTable {
    /// An empty table (a node with no peers replicates with nobody).
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from `(node id, address)` entries.
    pub fn from_entries<I, S>(entries: I) -> Self
    where
        I: IntoIterator<Item = (S, SocketAddr)>,
        S: Into<String>,
    {
        Self {
            peers: entries
                .into_iter()
                .map(|(id, addr)| (id.into(), addr))
                .collect(),
        }
    }

    pub fn insert(&mut self, node_id: impl Into<String>, addr: SocketAddr) {
        self.peers.insert(node_id.into(), addr);
    }

    pub fn get(&self, node_id: &str) -> Option<SocketAddr> {
        self.peers.get(node_id).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, SocketAddr)> {
        self.peers.iter().map(|(id, addr)| (id.as_str(), *addr))
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
