//! Handshake failure scenarios against a live node.

use {
    crate::harness::{TestCluster, TEST_KEY},
    plotsync_net::{
        conn::CHALLENGE_SIZE,
        envelope,
        framing::{self, TAG_AUT, TAG_AUT_END, TAG_SID, TAG_SID_END},
        ReplKey,
    },
    std::{
        io::{Read, Write},
        net::TcpStream,
        time::Duration,
    },
};

// ═══════════════════════════════════════════════════════════════════════════
//  1. A wrong challenge echo is rejected before any data flows
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_wrong_challenge_echo_is_rejected() {
    let mut cluster = TestCluster::new(1);
    let addr = cluster.node(1).server.local_addr().unwrap();

    let mut peer = TcpStream::connect(addr).unwrap();
    peer.set_read_timeout(Some(Duration::from_secs(2))).unwrap();

    // Announce ourselves and collect the node's challenge.
    peer.write_all(&framing::wrap(b"9", TAG_SID, TAG_SID_END))
        .unwrap();
    cluster.drive(5);

    let mut challenge_frame =
        vec![0u8; TAG_AUT.len() + CHALLENGE_SIZE + TAG_AUT_END.len()];
    peer.read_exact(&mut challenge_frame).unwrap();
    let challenge = framing::extract(&challenge_frame, TAG_AUT, TAG_AUT_END).unwrap();
    assert_eq!(challenge.len(), CHALLENGE_SIZE);

    // Echo twelve zero bytes instead of the challenge, under the right
    // key, plus a clear counter-challenge of our own.
    let key = ReplKey::from_bytes(&TEST_KEY).unwrap();
    let mut response = framing::wrap(&[0u8; CHALLENGE_SIZE], TAG_AUT, TAG_AUT_END);
    envelope::seal(&key, &mut response);
    response.extend_from_slice(&framing::wrap(&[1u8; CHALLENGE_SIZE], TAG_AUT, TAG_AUT_END));
    peer.write_all(&response).unwrap();

    cluster.drive(10);

    // The node hung up without ever opening the data phase.
    let mut rest = Vec::new();
    let _ = peer.read_to_end(&mut rest);
    assert!(rest.is_empty(), "node kept talking after an auth mismatch");
    assert_eq!(cluster.node(1).store_len(), 0);
    assert_eq!(cluster.node(1).server.active_connections(), 0);
}

// ═══════════════════════════════════════════════════════════════════════════
//  2. Nodes holding different keys never exchange plots
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_mismatched_keys_never_replicate() {
    let mut cluster = TestCluster::with_keys(&[[0x11; 16], [0x22; 16]]);

    cluster.node(1).observe(42, 1005, 10.0, 20.0);
    cluster.node(2).observe(42, 1003, 10.0, 20.0);

    cluster.drive(100);

    // Each store still holds exactly its own observation.
    assert_eq!(cluster.node(1).snapshot(), vec![(42, 1, 1005)]);
    assert_eq!(cluster.node(2).snapshot(), vec![(42, 2, 1003)]);
}

// ═══════════════════════════════════════════════════════════════════════════
//  3. Garbage in place of the identity frame is dropped quietly
// ═══════════════════════════════════════════════════════════════════════════

#[test]
fn test_garbage_connection_is_dropped() {
    let mut cluster = TestCluster::new(1);
    let addr = cluster.node(1).server.local_addr().unwrap();

    let mut peer = TcpStream::connect(addr).unwrap();
    peer.write_all(b"definitely not a handshake").unwrap();
    cluster.drive(10);

    assert_eq!(cluster.node(1).server.active_connections(), 0);
    assert_eq!(cluster.node(1).store_len(), 0);
}
