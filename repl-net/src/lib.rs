//! Authenticated replication transport for the drone plot network.
//!
//! Every pair of nodes exchanges newly observed plots over short-lived
//! TCP connections. A connection mutually proves possession of the shared
//! symmetric key, carries exactly one replication payload, and closes.
//! The whole layer is single-threaded and cooperative: non-blocking
//! sockets driven one readiness cycle at a time.
//!
//! ## Crate modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`framing`]  | In-band tag delimiters (`<SID>`, `<AUT>`, `<REP>`, `<ACK>`) |
//! | [`envelope`] | AES-128-CFB envelope with per-message IV, shared key handling |
//! | [`conn`]     | The per-connection handshake/replication state machine |
//! | [`queue`]    | Listener, active connection set, inbound payload queue |
//! | [`peer`]     | The static peer table |
//! | [`config`]   | Node configuration and dev overrides |
//! | [`error`]    | Crate-wide error enum |

pub mod config;
pub mod conn;
pub mod envelope;
pub mod error;
pub mod framing;
pub mod peer;
pub mod queue;

pub use {
    config::ReplConfig,
    conn::{ConnState, Connection},
    envelope::ReplKey,
    error::NetError,
    peer::PeerTable,
    queue::QueueMgr,
};
