//! Test harness for multi-node replication scenarios.
//!
//! Spins up several complete in-process nodes — store, deconflictor,
//! transport, driver — wired to each other over loopback TCP. Nodes are
//! driven deterministically, one cooperative cycle at a time, instead of
//! running free on threads; a scenario decides exactly how many cycles the
//! cluster gets.

use {
    plotsync_core::ReplServer,
    plotsync_db::{store::PlotDb, FLAG_NEW},
    plotsync_net::{ReplConfig, ReplKey},
    std::{
        net::{SocketAddr, TcpListener},
        sync::{atomic::AtomicBool, Arc, Mutex},
        thread,
        time::Duration,
    },
};

/// The shared replication key every test node loads.
pub const TEST_KEY: [u8; 16] = [0x42; 16];

/// One in-process node.
pub struct TestNode {
    /// Numeric node id; the wire identity is its decimal form.
    pub id: u32,
    /// The node's plot store, shared with the driver the way the
    /// simulator's handle would be.
    pub db: Arc<Mutex<PlotDb>>,
    /// The replication driver, already bound and listening.
    pub server: ReplServer,
}

impl TestNode {
    /// Record an observation as the node's simulator would: flagged `NEW`.
    pub fn observe(&self, drone_id: u32, timestamp: i64, latitude: f64, longitude: f64) {
        self.db
            .lock()
            .unwrap()
            .add_plot(drone_id, self.id, timestamp, latitude, longitude, FLAG_NEW);
    }

    /// Snapshot of the store's `(drone_id, node_id, timestamp)` triples.
    pub fn snapshot(&self) -> Vec<(u32, u32, i64)> {
        self.db
            .lock()
            .unwrap()
            .iter()
            .map(|p| (p.drone_id, p.node_id, p.timestamp))
            .collect()
    }

    pub fn store_len(&self) -> usize {
        self.db.lock().unwrap().len()
    }
}

/// A fully-wired cluster of in-process nodes with ids `1..=size`.
pub struct TestCluster {
    pub nodes: Vec<TestNode>,
}

impl TestCluster {
    /// Build `size` nodes, each listing every other node as a peer, all
    /// sharing [`TEST_KEY`].
    pub fn new(size: usize) -> Self {
        Self::with_keys(&vec![TEST_KEY; size])
    }

    /// Like [`TestCluster::new`] but with one key per node, for scenarios
    /// where a node holds the wrong key.
    pub fn with_keys(keys: &[[u8; 16]]) -> Self {
        let size = keys.len();
        let addrs = grab_loopback_addrs(size);

        let nodes = (0..size)
            .map(|i| {
                let id = (i + 1) as u32;
                let mut config = ReplConfig::dev_default(&id.to_string());
                config.bind_addr = addrs[i];
                config.peers = addrs
                    .iter()
                    .enumerate()
                    .filter(|(j, _)| *j != i)
                    .map(|(j, addr)| (((j + 1) as u32).to_string(), *addr))
                    .collect();

                let db = Arc::new(Mutex::new(PlotDb::new()));
                let mut server = ReplServer::new(
                    db.clone(),
                    config,
                    ReplKey::from_bytes(&keys[i]).unwrap(),
                    Arc::new(AtomicBool::new(false)),
                );
                server.bind().expect("test node failed to bind");

                TestNode { id, db, server }
            })
            .collect();

        Self { nodes }
    }

    /// Give every node `cycles` cooperative loop cycles, round-robin.
    pub fn drive(&mut self, cycles: usize) {
        for _ in 0..cycles {
            for node in &mut self.nodes {
                node.server.tick();
            }
            thread::sleep(Duration::from_millis(1));
        }
    }

    /// Drive until `done` holds or `max_cycles` have run. Returns whether
    /// the predicate was satisfied.
    pub fn drive_until(&mut self, max_cycles: usize, done: impl Fn(&Self) -> bool) -> bool {
        for _ in 0..max_cycles {
            self.drive(1);
            if done(self) {
                return true;
            }
        }
        false
    }

    pub fn node(&self, id: u32) -> &TestNode {
        &self.nodes[(id - 1) as usize]
    }
}

/// Reserve `count` distinct loopback addresses by binding ephemeral ports
/// and releasing them again. The ports stay practically free for the
/// nodes that bind them moments later.
fn grab_loopback_addrs(count: usize) -> Vec<SocketAddr> {
    let holders: Vec<TcpListener> = (0..count)
        .map(|_| TcpListener::bind("127.0.0.1:0").expect("loopback bind"))
        .collect();
    holders
        .iter()
        .map(|l| l.local_addr().expect("bound addr"))
        .collect()
}
