//! The connection queue manager.
//!
//! Owns the listening socket, every in-flight [`Connection`], and the
//! inbound payload queue. The whole layer is single-threaded and
//! cooperative: [`QueueMgr::handle_once`] does one non-blocking pass over
//! everything and returns promptly, and the replication driver calls it
//! in a tight loop.

use {
    crate::{
        config::ReplConfig,
        conn::{Connection, Role},
        envelope::ReplKey,
        error::Result,
        peer::PeerTable,
    },
    log::{debug, info, warn},
    std::{
        collections::VecDeque,
        io::ErrorKind,
        net::{SocketAddr, TcpListener},
        sync::Arc,
    },
};

/// Manages the listener, the active connection set, and the inbound queue
/// for one node.
pub struct QueueMgr {
    own_id: String,
    key: Arc<ReplKey>,
    peers: PeerTable,
    listener: Option<TcpListener>,
    conns: Vec<Connection>,
    inbound: VecDeque<(String, Vec<u8>)>,
}

impl QueueMgr {
    /// Create a manager for `own_id`, replicating to `peers` under `key`.
    pub fn new(own_id: &str, peers: PeerTable, key: Arc<ReplKey>) -> Self {
        Self {
            own_id: own_id.to_string(),
            key,
            peers,
            listener: None,
            conns: Vec::new(),
            inbound: VecDeque::new(),
        }
    }

    /// Build a manager straight from a node configuration plus its loaded
    /// key.
    pub fn from_config(config: &ReplConfig, key: ReplKey) -> Self {
        Self::new(
            &config.node_id,
            PeerTable::from_entries(config.peers.iter().cloned()),
            Arc::new(key),
        )
    }

    /// Open the listening socket. Failure here is fatal to the node.
    pub fn bind_and_listen(&mut self, addr: SocketAddr) -> Result<()> {
        let listener = TcpListener::bind(addr)?;
        listener.set_nonblocking(true)?;
        info!(
            "node {} listening for replication on {}",
            self.own_id,
            listener.local_addr()?
        );
        self.listener = Some(listener);
        Ok(())
    }

    pub fn is_bound(&self) -> bool {
        self.listener.is_some()
    }

    /// The bound address, once listening (useful when binding port 0).
    pub fn local_addr(&self) -> Option<SocketAddr> {
        self.listener.as_ref().and_then(|l| l.local_addr().ok())
    }

    /// One cycle of the cooperative loop: accept whatever is pending, step
    /// every connection's FSM, harvest completed payloads, and reap closed
    /// connections.
    pub fn handle_once(&mut self) {
        self.accept_pending();

        for conn in &mut self.conns {
            conn.step();
        }

        for conn in &mut self.conns {
            if let Some((peer_id, payload)) = conn.take_payload() {
                self.inbound.push_back((peer_id, payload));
            }
        }

        self.conns.retain(|conn| !conn.is_closed());
    }

    /// Dial every peer that has no live outbound connection, seeding each
    /// new connection with `payload` to deliver once authenticated. A
    /// failed dial is logged and skipped; the next call retries.
    pub fn send_to_all(&mut self, payload: &[u8]) {
        for (peer_id, addr) in self.peers.iter() {
            let already_dialled = self.conns.iter().any(|c| {
                c.role() == Role::Initiator && c.peer_id() == peer_id && !c.is_closed()
            });
            if already_dialled {
                continue;
            }

            match Connection::dial(peer_id, addr, &self.own_id, self.key.clone(), payload.to_vec())
            {
                Ok(conn) => {
                    debug!("dialled peer {peer_id} at {addr}");
                    self.conns.push(conn);
                }
                Err(e) => {
                    warn!("dial to peer {peer_id} at {addr} failed, skipping this round: {e}");
                }
            }
        }
    }

    /// Remove and return one inbound payload, if any.
    pub fn pop(&mut self) -> Option<(String, Vec<u8>)> {
        self.inbound.pop_front()
    }

    /// Number of connections currently alive (any state).
    pub fn active_connections(&self) -> usize {
        self.conns.len()
    }

    fn accept_pending(&mut self) {
        let Some(listener) = &self.listener else {
            return;
        };
        loop {
            match listener.accept() {
                Ok((stream, addr)) => {
                    debug!("accepted replication connection from {addr}");
                    match Connection::accept(stream, &self.own_id, self.key.clone()) {
                        Ok(conn) => self.conns.push(conn),
                        Err(e) => warn!("failed to adopt connection from {addr}: {e}"),
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("accept failed: {e}");
                    break;
                }
            }
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
