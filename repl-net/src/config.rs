//! Configuration for a replication node.

use std::{net::SocketAddr, path::PathBuf};

/// Configuration for one replication node.
///
/// Covers the listening socket, the static peer table, the shared key
/// location, and the pacing of the cooperative loop.
#[derive(Debug, Clone)]
pub struct ReplConfig {
    /// This node's identity, sent in clear during the handshake.
    pub node_id: String,

    /// Local address to bind the replication listener on.
    /// Default: `127.0.0.1:9999`
    pub bind_addr: SocketAddr,

    /// Static peer table entries: `(node id, address)`.
    pub peers: Vec<(String, SocketAddr)>,

    /// Path to the raw 16-byte shared replication key.
    pub key_path: PathBuf,

    /// How fast the simulation clock runs relative to the wall clock.
    /// 1.0 = real time, 2.0 = twice as fast. Affects only the adjusted
    /// clock that paces replication, never recorded plot timestamps.
    pub time_mult: f64,

    /// Adjusted seconds between replication rounds.
    pub secs_between_repl: i64,

    /// Wall-clock sleep between cooperative loop iterations.
    pub loop_sleep_ms: u64,

    /// Stdout chattiness, 0 (errors only) to 3 (trace).
    pub verbosity: u8,
}

impl Default for ReplConfig {
    fn default() -> Self {
        Self {
            node_id: "1".to_string(),
            bind_addr: "127.0.0.1:9999".parse().expect("valid default bind addr"),
            peers: Vec::new(),
            key_path: PathBuf::from("replication.key"),
            time_mult: 1.0,
            secs_between_repl: 20,
            loop_sleep_ms: 1,
            verbosity: 1,
        }
    }
}

impl ReplConfig {
    /// A config suitable for in-process testing: ephemeral port, immediate
    /// replication rounds.
    #[cfg(any(test, feature = "dev-context-only-utils"))]
    pub fn dev_default(node_id: &str) -> Self {
        Self {
            node_id: node_id.to_string(),
            bind_addr: "127.0.0.1:0".parse().expect("valid dev bind addr"),
            secs_between_repl: 0,
            ..Self::default()
        }
    }
}
