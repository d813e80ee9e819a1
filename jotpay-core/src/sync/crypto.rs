//! Sync encryption: seal and open record payloads for the remote tree.
//!
//! A sealed payload is the JSON [`RecordPayload`] encrypted with the vault key
//! (see [`crate::crypto::cipher`] for the wire format).

use crate::crypto::{decrypt_payload_with, encrypt_payload, VaultKey};
use crate::sync::models::RecordPayload;
use crate::{LedgerError, Result};

/// Serialize and encrypt a payload for upload.
pub fn seal_payload(key: &VaultKey, payload: &RecordPayload) -> Result<String> {
    let json = serde_json::to_string(payload).map_err(|e| LedgerError::Parse(e.to_string()))?;
    let sealed = encrypt_payload(key, &json)?;
    Ok(sealed)
}

/// Decrypt and parse a downloaded payload.
///
/// The legacy zero-IV reading is taken only when it parses as a payload.
/// Fails with [`LedgerError::Crypto`] when neither cipher format opens the
/// blob (wrong key or corruption) and with [`LedgerError::Parse`] when the
/// plaintext is not a valid payload.
pub fn open_payload(key: &VaultKey, sealed: &str) -> Result<RecordPayload> {
    let json = decrypt_payload_with(key, sealed, |text| {
        serde_json::from_str::<RecordPayload>(text).is_ok()
    })?;
    if json.is_empty() {
        return Err(LedgerError::Parse("Empty payload".to_string()));
    }
    serde_json::from_str(&json).map_err(|e| LedgerError::Parse(e.to_string()))
}
