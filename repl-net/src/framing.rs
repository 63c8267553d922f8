//! In-band frame delimiters for the replication protocol.
//!
//! Five ASCII byte-literal tags delimit every message on the wire:
//! `<SID>…</SID>` carries a node identity, `<AUT>…</AUT>` a challenge or
//! its echo, `<REP>…</REP>` a replication payload, and `<ACK>` (no closing
//! form) a receipt. Payloads are opaque bytes; extraction is first-match
//! on the fixed tag sequences, and the crypto envelope around the
//! encrypted phases keeps payload bytes from colliding with tags on the
//! wire.

use crate::error::{NetError, Result};

pub const TAG_SID: &[u8] = b"<SID>";
pub const TAG_SID_END: &[u8] = b"</SID>";
pub const TAG_AUT: &[u8] = b"<AUT>";
pub const TAG_AUT_END: &[u8] = b"</AUT>";
pub const TAG_REP: &[u8] = b"<REP>";
pub const TAG_REP_END: &[u8] = b"</REP>";
pub const TAG_ACK: &[u8] = b"<ACK>";

/// Byte offset of the first occurrence of `tag` in `buf`.
fn position(buf: &[u8], tag: &[u8]) -> Option<usize> {
    buf.windows(tag.len()).position(|window| window == tag)
}

/// Whether `tag` occurs anywhere in `buf`.
pub fn find(buf: &[u8], tag: &[u8]) -> bool {
    position(buf, tag).is_some()
}

/// Wrap `payload` in an opening and closing tag.
pub fn wrap(payload: &[u8], open: &[u8], close: &[u8]) -> Vec<u8> {
    let mut framed = Vec::with_capacity(open.len() + payload.len() + close.len());
    framed.extend_from_slice(open);
    framed.extend_from_slice(payload);
    framed.extend_from_slice(close);
    framed
}

/// The bytes strictly between the first `open` tag and the first `close`
/// tag at or after it.
pub fn extract<'a>(buf: &'a [u8], open: &[u8], close: &[u8]) -> Result<&'a [u8]> {
    let start = position(buf, open).ok_or_else(|| {
        NetError::Format(format!("opening tag {} not found", String::from_utf8_lossy(open)))
    })?;
    let body = &buf[start + open.len()..];
    let end = position(body, close).ok_or_else(|| {
        NetError::Format(format!("closing tag {} not found", String::from_utf8_lossy(close)))
    })?;
    Ok(&body[..end])
}

// ── Tests ───────────────────────────────────────────────────────────────────
