//! The crypto envelope around every post-handshake message.
//!
//! A keyed stream cipher in feedback mode (AES-128-CFB) with a fresh
//! 16-byte IV per message. Sealing replaces a plaintext buffer with
//! `IV ++ ciphertext`; opening strips the IV and decrypts in place. CFB
//! preserves length, so the wire size of a sealed message is always
//! `IV_SIZE` plus the plaintext size — the handshake relies on that to
//! split combined messages by construction.
//!
//! A wrong key cannot be detected here: decryption simply yields bytes
//! that fail tag extraction downstream.

use {
    crate::error::{NetError, Result},
    aes::cipher::{AsyncStreamCipher, KeyIvInit},
    rand::{rngs::OsRng, RngCore},
    std::{fmt, fs, path::Path},
    zeroize::{Zeroize, ZeroizeOnDrop},
};

/// AES-128 key width.
pub const KEY_SIZE: usize = 16;

/// Per-message initialization vector width.
pub const IV_SIZE: usize = 16;

type Aes128CfbEnc = cfb_mode::Encryptor<aes::Aes128>;
type Aes128CfbDec = cfb_mode::Decryptor<aes::Aes128>;

/// The shared replication key.
///
/// Owned once per process and borrowed by every connection; the bytes are
/// zeroized on drop and never appear in `Debug` output.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ReplKey {
    bytes: [u8; KEY_SIZE],
}

impl ReplKey {
    /// Build a key from exactly [`KEY_SIZE`] raw bytes.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| NetError::Key {
            path: "<memory>".to_string(),
            reason: format!("expected {KEY_SIZE} bytes, got {}", bytes.len()),
        })?;
        Ok(Self { bytes })
    }

    /// Load the key from a raw binary file. Fatal at startup when the file
    /// is missing or not exactly [`KEY_SIZE`] bytes.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read(path).map_err(|e| NetError::Key {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        let bytes: [u8; KEY_SIZE] = contents.as_slice().try_into().map_err(|_| NetError::Key {
            path: path.display().to_string(),
            reason: format!("expected {KEY_SIZE} bytes, got {}", contents.len()),
        })?;
        Ok(Self { bytes })
    }
}

impl fmt::Debug for ReplKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ReplKey").field("bytes", &"[REDACTED]").finish()
    }
}

/// Encrypt `buf` in place under a fresh random IV and prepend the IV.
pub fn seal(key: &ReplKey, buf: &mut Vec<u8>) {
    let mut iv = [0u8; IV_SIZE];
    OsRng.fill_bytes(&mut iv);

    Aes128CfbEnc::new((&key.bytes).into(), (&iv).into()).encrypt(buf);

    let mut sealed = Vec::with_capacity(IV_SIZE + buf.len());
    sealed.extend_from_slice(&iv);
    sealed.append(buf);
    *buf = sealed;
}

/// Split the leading IV off `buf` and decrypt the remainder in place.
pub fn open(key: &ReplKey, buf: &mut Vec<u8>) -> Result<()> {
    if buf.len() < IV_SIZE {
        return Err(NetError::Crypto(format!(
            "envelope of {} bytes is shorter than one IV",
            buf.len()
        )));
    }

    let mut iv = [0u8; IV_SIZE];
    iv.copy_from_slice(&buf[..IV_SIZE]);
    buf.drain(..IV_SIZE);

    Aes128CfbDec::new((&key.bytes).into(), (&iv).into()).decrypt(buf);
    Ok(())
}

// ── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use {super::*, std::io::Write};

    fn test_key() -> ReplKey {
        ReplKey::from_bytes(&[0x42; KEY_SIZE]).unwrap()
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let key = test_key();
        let plaintext = b"<AUT>abcdefghijkl</AUT>".to_vec();

        let mut buf = plaintext.clone();
        seal(&key, &mut buf);
        assert_eq!(buf.len(), IV_SIZE + plaintext.len());
        assert_ne!(&buf[IV_SIZE..], plaintext.as_slice());

        open(&key, &mut buf).unwrap();
        assert_eq!(buf, plaintext);
    }

    #[test]
    fn test_sealing_preserves_length() {
        let key = test_key();
        for len in [0usize, 1, 23, 46, 1024] {
            let mut buf = vec![0xAB; len];
            seal(&key, &mut buf);
            assert_eq!(buf.len(), IV_SIZE + len);
        }
    }

    #[test]
    fn test_fresh_iv_per_message() {
        let key = test_key();
        let mut a = b"same plaintext".to_vec();
        let mut b = b"same plaintext".to_vec();
        seal(&key, &mut a);
        seal(&key, &mut b);
        assert_ne!(a[..IV_SIZE], b[..IV_SIZE]);
        assert_ne!(a[IV_SIZE..], b[IV_SIZE..]);
    }

    #[test]
    fn test_wrong_key_yields_garbage_not_error() {
        let mut buf = b"<ACK>".to_vec();
        seal(&test_key(), &mut buf);

        let other = ReplKey::from_bytes(&[0x43; KEY_SIZE]).unwrap();
        open(&other, &mut buf).unwrap();
        assert_ne!(buf, b"<ACK>");
    }

    #[test]
    fn test_open_rejects_short_envelope() {
        let mut buf = vec![0u8; IV_SIZE - 1];
        assert!(matches!(
            open(&test_key(), &mut buf),
            Err(NetError::Crypto(_))
        ));
    }

    #[test]
    fn test_key_from_wrong_length() {
        assert!(ReplKey::from_bytes(&[0u8; 8]).is_err());
        assert!(ReplKey::from_bytes(&[0u8; 32]).is_err());
    }

    #[test]
    fn test_key_debug_is_redacted() {
        let rendered = format!("{:?}", test_key());
        assert!(rendered.contains("REDACTED"));
        assert!(!rendered.contains("66")); // 0x42
    }

    #[test]
    fn test_key_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0x11; KEY_SIZE]).unwrap();
        file.flush().unwrap();

        let key = ReplKey::load(file.path()).unwrap();
        let mut buf = b"probe".to_vec();
        seal(&key, &mut buf);
        open(&key, &mut buf).unwrap();
        assert_eq!(buf, b"probe");
    }

    #[test]
    fn test_key_load_rejects_wrong_length_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&[0x11; 10]).unwrap();
        file.flush().unwrap();
        assert!(matches!(
            ReplKey::load(file.path()),
            Err(NetError::Key { .. })
        ));
    }

    #[test]
    fn test_key_load_missing_file() {
        assert!(matches!(
            ReplKey::load(Path::new("/nonexistent/replication.key")),
            Err(NetError::Key { .. })
        ));
    }
}
