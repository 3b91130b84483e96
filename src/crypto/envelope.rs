//! Envelope encryption of signing keys at rest.
//!
//! # Format
//!
//! `base64(nonce || ciphertext || tag)` using ChaCha20-Poly1305 under the
//! process master key. A fresh 12-byte nonce is drawn for every seal, so the
//! same plaintext never produces the same blob twice.

use std::fmt;

use base64::{engine::general_purpose::STANDARD, Engine};
use chacha20poly1305::{aead::Aead, ChaCha20Poly1305, Key, KeyInit, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::types::{Result, SignerError};

/// Master key length (256 bits)
pub const MASTER_KEY_LEN: usize = 32;

/// Nonce length for ChaCha20-Poly1305 (96 bits)
pub const NONCE_LEN: usize = 12;

/// ChaCha20-Poly1305 auth tag length
pub const AUTH_TAG_LEN: usize = 16;

/// Process-wide key that wraps every per-session private key
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey([u8; MASTER_KEY_LEN]);

impl MasterKey {
    pub fn from_bytes(bytes: [u8; MASTER_KEY_LEN]) -> Self {
        Self(bytes)
    }

    /// Decode a hex-encoded key; anything other than exactly 32 bytes is rejected.
    pub fn from_hex(encoded: &str) -> Result<Self> {
        let decoded = Zeroizing::new(
            hex::decode(encoded.trim())
                .map_err(|e| SignerError::Config(format!("Master key is not valid hex: {e}")))?,
        );

        if decoded.len() != MASTER_KEY_LEN {
            return Err(SignerError::Config(format!(
                "Master key must be {} bytes ({} hex chars), got {} bytes",
                MASTER_KEY_LEN,
                MASTER_KEY_LEN * 2,
                decoded.len()
            )));
        }

        let mut key = [0u8; MASTER_KEY_LEN];
        key.copy_from_slice(&decoded);
        Ok(Self(key))
    }

    fn cipher(&self) -> ChaCha20Poly1305 {
        ChaCha20Poly1305::new(Key::from_slice(&self.0))
    }
}

impl fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("MasterKey(<redacted>)")
    }
}

/// Encrypt `plaintext` under the master key, returning a text-safe blob.
pub fn seal(master_key: &MasterKey, plaintext: &[u8]) -> Result<String> {
    let mut nonce = [0u8; NONCE_LEN];
    OsRng
        .try_fill_bytes(&mut nonce)
        .map_err(|e| SignerError::Crypto(format!("OS RNG unavailable: {e}")))?;

    let ciphertext = master_key
        .cipher()
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|e| SignerError::Crypto(format!("Encryption failed: {e}")))?;

    let mut blob = Vec::with_capacity(NONCE_LEN + ciphertext.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ciphertext);

    Ok(STANDARD.encode(blob))
}

/// Decrypt a blob produced by [`seal`].
///
/// # Errors
///
/// Returns `SignerError::Auth` if the blob is not valid base64, is shorter
/// than a nonce plus tag, was modified, or was sealed under another key.
pub fn open(master_key: &MasterKey, sealed: &str) -> Result<Zeroizing<Vec<u8>>> {
    let blob = STANDARD
        .decode(sealed.trim())
        .map_err(|_| SignerError::Auth("Sealed payload is corrupted".into()))?;

    if blob.len() < NONCE_LEN + AUTH_TAG_LEN {
        return Err(SignerError::Auth("Sealed payload is truncated".into()));
    }

    let (nonce, ciphertext) = blob.split_at(NONCE_LEN);
    master_key
        .cipher()
        .decrypt(Nonce::from_slice(nonce), ciphertext)
        .map(Zeroizing::new)
        .map_err(|_| SignerError::Auth("Failed to open sealed payload (wrong key or tampered)".into()))
}
