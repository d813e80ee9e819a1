//! Vault key derivation from the shared secret.
//!
//! The secret is right-padded with ASCII `'0'` to sixteen UTF-16 code units,
//! UTF-8 encoded, then truncated (or zero-filled) to exactly 16 bytes. Secrets
//! containing multi-byte characters lose their tail to the truncation; the
//! behavior is kept as-is so payloads written by existing installations stay
//! readable.

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Length of the AES-128 vault key in bytes
pub const KEY_SIZE: usize = 16;

/// Pad target, counted in UTF-16 code units like the installations that
/// wrote the existing payloads.
const PAD_UNITS: usize = 16;

/// A derived AES-128 key, zeroized when dropped
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct VaultKey {
    key: [u8; KEY_SIZE],
}

impl VaultKey {
    /// Get the raw key bytes (use sparingly)
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.key
    }
}

impl std::fmt::Debug for VaultKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("VaultKey(..)")
    }
}

/// Derive the 16-byte vault key from a shared secret.
pub fn derive_key(secret: &str) -> VaultKey {
    let units = secret.encode_utf16().count();
    let mut padded = String::with_capacity(secret.len() + PAD_UNITS);
    padded.push_str(secret);
    for _ in units..PAD_UNITS {
        padded.push('0');
    }

    let raw = padded.as_bytes();
    let mut key = [0u8; KEY_SIZE];
    let len = raw.len().min(KEY_SIZE);
    key[..len].copy_from_slice(&raw[..len]);

    padded.zeroize();
    VaultKey { key }
}
