//! The per-connection handshake and replication state machine.
//!
//! Every TCP connection runs one of these on each endpoint. The initiator
//! (the side that dialled) identifies itself in clear, answers the
//! acceptor's challenge under the shared key, verifies the acceptor's
//! echo of its own counter-challenge, and only then ships its replication
//! payload. The acceptor mirrors the exchange and parks the decrypted
//! payload in [`ConnState::HasData`] for the queue manager to drain.
//!
//! ```text
//!  initiator                        acceptor
//!  Connecting          <SID>id</SID>          Connected
//!  ClientWaitChallenge <AUT>Cs</AUT>          ServerSendChallenge
//!                      seal(<AUT>Cs</AUT>)
//!                      ++ <AUT>Ci</AUT>       ServerWaitResponse
//!  ClientWaitFinal     seal(<AUT>Ci</AUT>)    ServerSendEcho
//!  ClientSendData      seal(<REP>data</REP>)  ServerWaitData
//!  ClientWaitAck       seal(<ACK>)            HasData (closed)
//!  Closed
//! ```
//!
//! The state set is a plain tagged enum with explicit transition code so
//! every transition is locally inspectable. Each `step` advances at most
//! one state: waiting states advance only when the socket has readable
//! bytes this cycle, sending states act immediately on entry. Any frame
//! error, crypto error, challenge mismatch, or socket error is fatal to
//! this connection alone — it is logged and the connection closes.

use {
    crate::{
        envelope::{self, ReplKey, IV_SIZE},
        error::{NetError, Result},
        framing::{
            self, TAG_ACK, TAG_AUT, TAG_AUT_END, TAG_REP, TAG_REP_END, TAG_SID, TAG_SID_END,
        },
    },
    log::{debug, info, warn},
    rand::{rngs::OsRng, RngCore},
    std::{
        io::{ErrorKind, Read, Write},
        mem,
        net::{Shutdown, SocketAddr, TcpStream},
        sync::Arc,
    },
};

/// Width of the random challenge each side issues.
pub const CHALLENGE_SIZE: usize = 12;

/// Wire length of one sealed challenge frame: the IV plus the CFB image
/// of `<AUT>` ++ challenge ++ `</AUT>` (CFB preserves length). The
/// acceptor splits the initiator's combined response at exactly this
/// offset, sized by construction.
pub const SEALED_CHALLENGE_LEN: usize =
    IV_SIZE + TAG_AUT.len() + CHALLENGE_SIZE + TAG_AUT_END.len();

/// Which side of the connection this endpoint is. Fixed at creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// We dialled out to replicate our plots.
    Initiator,
    /// We accepted the connection and will receive plots.
    Acceptor,
}

/// Connection lifecycle states. The `Client*` states are only reachable
/// by initiators, the `Server*` states only by acceptors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    /// Initiator, just connected: send our node id in clear.
    Connecting,
    /// Acceptor, waiting for the initiator's node id.
    Connected,
    /// Acceptor: issue a random challenge in clear.
    ServerSendChallenge,
    /// Initiator: waiting for the acceptor's challenge.
    ClientWaitChallenge,
    /// Acceptor: waiting for the sealed echo plus counter-challenge.
    ServerWaitResponse,
    /// Acceptor: seal and return the initiator's counter-challenge.
    ServerSendEcho,
    /// Initiator: waiting for the sealed echo of our counter-challenge.
    ClientWaitFinal,
    /// Initiator: authenticated — ship the replication payload.
    ClientSendData,
    /// Acceptor: waiting for the replication payload.
    ServerWaitData,
    /// Initiator: waiting for the receipt before disconnecting.
    ClientWaitAck,
    /// Acceptor, terminal: payload received and socket closed, waiting
    /// for the queue manager to drain it.
    HasData,
    /// Terminal: socket closed, nothing pending.
    Closed,
}

/// One endpoint of a replication connection.
pub struct Connection {
    stream: TcpStream,
    state: ConnState,
    role: Role,
    key: Arc<ReplKey>,
    own_id: String,
    /// The remote node's identity: configured on dial, learned from the
    /// `<SID>` frame on accept.
    peer_id: String,
    peer_addr: SocketAddr,
    /// The challenge this endpoint issued and expects echoed back sealed.
    issued_challenge: Vec<u8>,
    /// The challenge received from the peer, awaiting our sealed echo.
    peer_challenge: Vec<u8>,
    /// Replication payload to send once authenticated (initiator only).
    outbound: Vec<u8>,
    /// Decrypted replication payload (acceptor only).
    inbound: Option<Vec<u8>>,
}

impl Connection {
    /// Adopt an accepted socket as the acceptor side of a connection.
    pub fn accept(stream: TcpStream, own_id: &str, key: Arc<ReplKey>) -> Result<Self> {
        stream.set_nonblocking(true)?;
        let peer_addr = stream.peer_addr()?;
        Ok(Self {
            stream,
            state: ConnState::Connected,
            role: Role::Acceptor,
            key,
            own_id: own_id.to_string(),
            peer_id: String::new(),
            peer_addr,
            issued_challenge: Vec::new(),
            peer_challenge: Vec::new(),
            outbound: Vec::new(),
            inbound: None,
        })
    }

    /// Dial `addr` and become the initiator side, seeded with the payload
    /// to replicate once the handshake completes.
    pub fn dial(
        peer_id: &str,
        addr: SocketAddr,
        own_id: &str,
        key: Arc<ReplKey>,
        payload: Vec<u8>,
    ) -> Result<Self> {
        let stream = TcpStream::connect(addr)?;
        stream.set_nonblocking(true)?;
        Ok(Self {
            stream,
            state: ConnState::Connecting,
            role: Role::Initiator,
            key,
            own_id: own_id.to_string(),
            peer_id: peer_id.to_string(),
            peer_addr: addr,
            issued_challenge: Vec::new(),
            peer_challenge: Vec::new(),
            outbound: payload,
            inbound: None,
        })
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn role(&self) -> Role {
        self.role
    }

    /// The remote node id, or its socket address while still unknown.
    pub fn peer_id(&self) -> &str {
        &self.peer_id
    }

    pub fn is_closed(&self) -> bool {
        self.state == ConnState::Closed
    }

    pub fn has_data(&self) -> bool {
        self.state == ConnState::HasData
    }

    /// Drain the received replication payload, closing the connection
    /// record. Returns `None` unless the FSM reached [`ConnState::HasData`].
    pub fn take_payload(&mut self) -> Option<(String, Vec<u8>)> {
        if self.state != ConnState::HasData {
            return None;
        }
        self.state = ConnState::Closed;
        self.inbound
            .take()
            .map(|payload| (mem::take(&mut self.peer_id), payload))
    }

    /// Advance the state machine by at most one state.
    ///
    /// Errors never escape: a failed connection logs why and closes.
    pub fn step(&mut self) {
        if matches!(self.state, ConnState::HasData | ConnState::Closed) {
            return;
        }
        if let Err(e) = self.advance() {
            match e {
                NetError::AuthMismatch => {
                    warn!("auth mismatch from {}, disconnecting", self.peer_label());
                }
                other => {
                    warn!(
                        "connection with {} failed in {:?}: {other}",
                        self.peer_label(),
                        self.state
                    );
                }
            }
            self.close();
        }
    }

    fn advance(&mut self) -> Result<()> {
        match self.state {
            ConnState::Connecting => self.send_node_id(),
            ConnState::Connected => self.wait_node_id(),
            ConnState::ServerSendChallenge => self.send_challenge(),
            ConnState::ClientWaitChallenge => self.answer_challenge(),
            ConnState::ServerWaitResponse => self.check_challenge_response(),
            ConnState::ServerSendEcho => self.send_challenge_echo(),
            ConnState::ClientWaitFinal => self.check_challenge_echo(),
            ConnState::ClientSendData => self.send_replication(),
            ConnState::ServerWaitData => self.recv_replication(),
            ConnState::ClientWaitAck => self.await_ack(),
            ConnState::HasData | ConnState::Closed => Ok(()),
        }
    }

    // ── Initiator states ────────────────────────────────────────────────

    /// `Connecting`: identify ourselves in clear.
    fn send_node_id(&mut self) -> Result<()> {
        let frame = framing::wrap(self.own_id.as_bytes(), TAG_SID, TAG_SID_END);
        self.send(&frame)?;
        self.state = ConnState::ClientWaitChallenge;
        Ok(())
    }

    /// `ClientWaitChallenge`: seal the acceptor's challenge and append a
    /// fresh clear counter-challenge, as one write.
    fn answer_challenge(&mut self) -> Result<()> {
        let Some(buf) = self.read_ready()? else {
            return Ok(());
        };
        let challenge = framing::extract(&buf, TAG_AUT, TAG_AUT_END)?;

        let mut reply = framing::wrap(challenge, TAG_AUT, TAG_AUT_END);
        envelope::seal(&self.key, &mut reply);

        self.issued_challenge = fresh_challenge();
        reply.extend_from_slice(&framing::wrap(&self.issued_challenge, TAG_AUT, TAG_AUT_END));

        self.send(&reply)?;
        self.state = ConnState::ClientWaitFinal;
        Ok(())
    }

    /// `ClientWaitFinal`: the acceptor must echo our counter-challenge
    /// under the shared key.
    fn check_challenge_echo(&mut self) -> Result<()> {
        let Some(mut buf) = self.read_ready()? else {
            return Ok(());
        };
        envelope::open(&self.key, &mut buf)?;
        let echoed = framing::extract(&buf, TAG_AUT, TAG_AUT_END)?;
        if echoed != self.issued_challenge {
            return Err(NetError::AuthMismatch);
        }
        debug!("authenticated with {}", self.peer_label());
        self.state = ConnState::ClientSendData;
        Ok(())
    }

    /// `ClientSendData`: ship the prearranged payload.
    fn send_replication(&mut self) -> Result<()> {
        let payload = mem::take(&mut self.outbound);
        let mut frame = framing::wrap(&payload, TAG_REP, TAG_REP_END);
        envelope::seal(&self.key, &mut frame);
        self.send(&frame)?;
        debug!(
            "sent {} replication bytes to {}",
            payload.len(),
            self.peer_label()
        );
        self.state = ConnState::ClientWaitAck;
        Ok(())
    }

    /// `ClientWaitAck`: wait for the receipt, then disconnect whether or
    /// not it checks out.
    fn await_ack(&mut self) -> Result<()> {
        let Some(mut buf) = self.read_ready()? else {
            return Ok(());
        };
        let acked = envelope::open(&self.key, &mut buf).is_ok() && framing::find(&buf, TAG_ACK);
        if !acked {
            warn!(
                "expected ack from {}, received something else",
                self.peer_label()
            );
        }
        self.close();
        Ok(())
    }

    // ── Acceptor states ─────────────────────────────────────────────────

    /// `Connected`: learn who dialled us.
    fn wait_node_id(&mut self) -> Result<()> {
        let Some(buf) = self.read_ready()? else {
            return Ok(());
        };
        let id = framing::extract(&buf, TAG_SID, TAG_SID_END)?;
        self.peer_id = String::from_utf8(id.to_vec())
            .map_err(|_| NetError::Format("node id is not UTF-8".to_string()))?;
        debug!("connection from node {}", self.peer_id);
        self.state = ConnState::ServerSendChallenge;
        Ok(())
    }

    /// `ServerSendChallenge`: issue a fresh random challenge in clear.
    fn send_challenge(&mut self) -> Result<()> {
        self.issued_challenge = fresh_challenge();
        let frame = framing::wrap(&self.issued_challenge, TAG_AUT, TAG_AUT_END);
        self.send(&frame)?;
        self.state = ConnState::ServerWaitResponse;
        Ok(())
    }

    /// `ServerWaitResponse`: the first [`SEALED_CHALLENGE_LEN`] bytes are
    /// the sealed echo of our challenge, the remainder the peer's clear
    /// counter-challenge.
    fn check_challenge_response(&mut self) -> Result<()> {
        let Some(buf) = self.read_ready()? else {
            return Ok(());
        };
        if buf.len() < SEALED_CHALLENGE_LEN {
            return Err(NetError::Format(format!(
                "challenge response of {} bytes, expected at least {SEALED_CHALLENGE_LEN}",
                buf.len()
            )));
        }

        let mut sealed = buf[..SEALED_CHALLENGE_LEN].to_vec();
        envelope::open(&self.key, &mut sealed)?;
        let echoed = framing::extract(&sealed, TAG_AUT, TAG_AUT_END)?;
        if echoed != self.issued_challenge {
            return Err(NetError::AuthMismatch);
        }

        self.peer_challenge =
            framing::extract(&buf[SEALED_CHALLENGE_LEN..], TAG_AUT, TAG_AUT_END)?.to_vec();
        self.state = ConnState::ServerSendEcho;
        Ok(())
    }

    /// `ServerSendEcho`: prove we hold the key too.
    fn send_challenge_echo(&mut self) -> Result<()> {
        let mut frame = framing::wrap(&self.peer_challenge, TAG_AUT, TAG_AUT_END);
        envelope::seal(&self.key, &mut frame);
        self.send(&frame)?;
        self.state = ConnState::ServerWaitData;
        Ok(())
    }

    /// `ServerWaitData`: receive the payload, acknowledge, disconnect.
    fn recv_replication(&mut self) -> Result<()> {
        let Some(mut buf) = self.read_ready()? else {
            return Ok(());
        };
        envelope::open(&self.key, &mut buf)?;
        let payload = framing::extract(&buf, TAG_REP, TAG_REP_END).map_err(|_| {
            NetError::Format(format!(
                "replication data corrupt from {}",
                self.peer_label()
            ))
        })?;
        self.inbound = Some(payload.to_vec());

        let mut ack = TAG_ACK.to_vec();
        envelope::seal(&self.key, &mut ack);
        self.send(&ack)?;

        info!(
            "received {} replication bytes from {}",
            payload.len(),
            self.peer_label()
        );
        let _ = self.stream.shutdown(Shutdown::Both);
        self.state = ConnState::HasData;
        Ok(())
    }

    // ── Socket plumbing ─────────────────────────────────────────────────

    fn send(&mut self, frame: &[u8]) -> Result<()> {
        self.stream.write_all(frame)?;
        Ok(())
    }

    /// Accumulate every byte the socket reports ready this cycle.
    ///
    /// `Ok(None)` means nothing is pending and the state should wait.
    /// A clean close with no buffered data is a [`NetError::Disconnected`];
    /// a close after data yields the data (the peer may legitimately close
    /// right behind its final message).
    fn read_ready(&mut self) -> Result<Option<Vec<u8>>> {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            match self.stream.read(&mut chunk) {
                Ok(0) => {
                    if buf.is_empty() {
                        return Err(NetError::Disconnected);
                    }
                    return Ok(Some(buf));
                }
                Ok(n) => buf.extend_from_slice(&chunk[..n]),
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(if buf.is_empty() { None } else { Some(buf) })
    }

    fn close(&mut self) {
        let _ = self.stream.shutdown(Shutdown::Both);
        self.state = ConnState::Closed;
    }

    fn peer_label(&self) -> String {
        if self.peer_id.is_empty() {
            self.peer_addr.to_string()
        } else {
            format!("node {}", self.peer_id)
        }
    }
}

/// Twelve uniformly random bytes from the OS RNG.
fn fresh_challenge() -> Vec<u8> {
    let mut challenge = vec![0u8; CHALLENGE_SIZE];
    OsRng.fill_bytes(&mut challenge);
    challenge
}

// ── Tests ───────────────────────────────────────────────────────────────────
