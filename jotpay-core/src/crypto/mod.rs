//! Cryptographic primitives for vault payloads.
//!
//! This module provides:
//! - Derivation of the 128-bit vault key from the shared secret
//! - AES-128-CBC payload encryption with a random IV per call
//! - Decryption of both the current and the legacy zero-IV formats

pub mod cipher;
pub mod kdf;

pub use cipher::{
    decrypt, decrypt_payload, decrypt_payload_with, encrypt, encrypt_payload, IV_SIZE,
};
pub use kdf::{derive_key, VaultKey, KEY_SIZE};

use thiserror::Error;

/// Errors that can occur in cryptographic operations
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    EncryptionFailed(String),

    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    #[error("Encoding error: {0}")]
    Encoding(String),
}

/// Result type for crypto operations
pub type Result<T> = std::result::Result<T, CryptoError>;
