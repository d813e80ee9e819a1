//! AES-128-CBC encryption and decryption for vault payloads.
//!
//! Wire format: `base64(iv(16) || ciphertext)` with PKCS#7 padding and a
//! fresh random IV per call. Payloads written before random IVs existed are
//! `base64(ciphertext)` under an all-zero IV; [`decrypt`] still reads them.

use crate::crypto::kdf::{derive_key, VaultKey};
use crate::crypto::{CryptoError, Result};
use aes::Aes128;
use base64::{engine::general_purpose::STANDARD, Engine};
use cbc::cipher::{block_padding::Pkcs7, BlockDecryptMut, BlockEncryptMut, KeyIvInit};
use rand::RngCore;

type Aes128CbcEnc = cbc::Encryptor<Aes128>;
type Aes128CbcDec = cbc::Decryptor<Aes128>;

/// Size of the CBC initialization vector in bytes
pub const IV_SIZE: usize = 16;

const LEGACY_IV: [u8; IV_SIZE] = [0u8; IV_SIZE];

/// Encrypt a payload string under the vault key.
///
/// Returns `base64(iv || ciphertext)`.
pub fn encrypt_payload(key: &VaultKey, plaintext: &str) -> Result<String> {
    let mut iv = [0u8; IV_SIZE];
    rand::thread_rng()
        .try_fill_bytes(&mut iv)
        .map_err(|e| CryptoError::EncryptionFailed(format!("IV generation failed: {}", e)))?;

    let ciphertext = Aes128CbcEnc::new(key.as_bytes().into(), &iv.into())
        .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());

    let mut combined = Vec::with_capacity(IV_SIZE + ciphertext.len());
    combined.extend_from_slice(&iv);
    combined.extend_from_slice(&ciphertext);

    Ok(STANDARD.encode(combined))
}

/// Decrypt a payload string written by any JotPay installation.
///
/// Equivalent to [`decrypt_payload_with`] accepting any plaintext that reads
/// as text.
pub fn decrypt_payload(key: &VaultKey, encoded: &str) -> Result<String> {
    decrypt_payload_with(key, encoded, looks_like_text)
}

/// Decrypt a payload, using `accept` to tell the two wire formats apart.
///
/// Under CBC a legacy blob read as `iv || ciphertext` still decrypts: it
/// yields the legacy plaintext minus its first block. Likewise a current blob
/// read as legacy yields one garbage block followed by the real plaintext.
/// Both readings usually succeed, so the legacy reading wins only when
/// `accept` approves its plaintext; otherwise the current reading is used.
pub fn decrypt_payload_with<F>(key: &VaultKey, encoded: &str, accept: F) -> Result<String>
where
    F: Fn(&str) -> bool,
{
    let decoded = STANDARD
        .decode(encoded.trim())
        .map_err(|e| CryptoError::Encoding(e.to_string()))?;

    let legacy = decrypt_block(key, &LEGACY_IV, &decoded);
    if matches!(&legacy, Ok(plaintext) if accept(plaintext)) {
        return legacy;
    }

    if decoded.len() > IV_SIZE {
        let (iv, body) = decoded.split_at(IV_SIZE);
        if let Ok(plaintext) = decrypt_block(key, iv, body) {
            return Ok(plaintext);
        }
    }

    legacy
}

/// Printable text: no control characters besides common whitespace. A
/// random 16-byte block passes this with negligible probability.
fn looks_like_text(plaintext: &str) -> bool {
    plaintext
        .chars()
        .all(|c| !c.is_control() || matches!(c, '\n' | '\r' | '\t'))
}

fn decrypt_block(key: &VaultKey, iv: &[u8], body: &[u8]) -> Result<String> {
    if body.is_empty() {
        return Err(CryptoError::DecryptionFailed(
            "Cannot decrypt empty data".to_string(),
        ));
    }

    let iv: [u8; IV_SIZE] = iv
        .try_into()
        .map_err(|_| CryptoError::DecryptionFailed("Invalid IV length".to_string()))?;

    let plaintext = Aes128CbcDec::new(key.as_bytes().into(), &iv.into())
        .decrypt_padded_vec_mut::<Pkcs7>(body)
        .map_err(|_| CryptoError::DecryptionFailed("Bad padding".to_string()))?;

    String::from_utf8(plaintext)
        .map_err(|_| CryptoError::DecryptionFailed("Invalid UTF-8".to_string()))
}

/// Encrypt `plaintext` with a key derived from `secret`.
///
/// Returns an empty string on any failure; callers must treat an empty
/// result as failure rather than as a valid ciphertext.
pub fn encrypt(plaintext: &str, secret: &str) -> String {
    encrypt_payload(&derive_key(secret), plaintext).unwrap_or_default()
}

/// Decrypt `ciphertext` with a key derived from `secret`.
///
/// Returns an empty string when neither format decrypts. A wrong key and
/// corrupt data are indistinguishable here.
pub fn decrypt(ciphertext: &str, secret: &str) -> String {
    decrypt_payload(&derive_key(secret), ciphertext).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encrypt_legacy(plaintext: &str, secret: &str) -> String {
        let key = derive_key(secret);
        let ciphertext = Aes128CbcEnc::new(key.as_bytes().into(), &LEGACY_IV.into())
            .encrypt_padded_vec_mut::<Pkcs7>(plaintext.as_bytes());
        STANDARD.encode(ciphertext)
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let plaintext = r#"{"o":"-50 Coffee","a":-50.0,"d":"Coffee","t":1000}"#;
        let encrypted = encrypt(plaintext, "my-secret");

        assert!(!encrypted.is_empty());
        assert_eq!(decrypt(&encrypted, "my-secret"), plaintext);
    }

    #[test]
    fn test_roundtrip_across_secret_lengths() {
        let plaintext = "ledger entry ✓ with ünïcödé";
        for len in 1..=64 {
            let secret: String = "kQ7ü".chars().cycle().take(len).collect();
            let encrypted = encrypt(plaintext, &secret);
            assert_eq!(decrypt(&encrypted, &secret), plaintext, "secret length {}", len);
        }
    }

    #[test]
    fn test_empty_plaintext_roundtrip() {
        let encrypted = encrypt("", "secret");
        // One IV plus one full padding block
        assert_eq!(STANDARD.decode(&encrypted).unwrap().len(), IV_SIZE + 16);
        assert_eq!(decrypt(&encrypted, "secret"), "");
    }

    #[test]
    fn test_random_iv_per_call() {
        let a = encrypt("same data", "secret");
        let b = encrypt("same data", "secret");

        assert_ne!(a, b);
        assert_eq!(decrypt(&a, "secret"), decrypt(&b, "secret"));
    }

    #[test]
    fn test_legacy_zero_iv_payload_decrypts() {
        let plaintext = r#"{"o":"+200 salary","a":200.0,"d":"salary","t":42}"#;
        let legacy = encrypt_legacy(plaintext, "1234");

        assert_eq!(decrypt(&legacy, "1234"), plaintext);
    }

    #[test]
    fn test_multi_block_legacy_payload_keeps_first_block() {
        let plaintext = r#"{"o":"+100 gift","a":100,"d":"gift","t":123}"#;
        let legacy = encrypt_legacy(plaintext, "1234");
        assert!(STANDARD.decode(&legacy).unwrap().len() > 2 * IV_SIZE);

        assert_eq!(decrypt(&legacy, "1234"), plaintext);
    }

    #[test]
    fn test_current_payloads_never_read_as_legacy() {
        let plaintext = r#"{"o":"-5 bus","a":-5.0,"d":"bus","t":7,"n":"NORMAL","oa":0.0}"#;
        for _ in 0..500 {
            assert_eq!(decrypt(&encrypt(plaintext, "k"), "k"), plaintext);
        }
    }

    #[test]
    fn test_validator_selects_format() {
        let key = derive_key("1234");
        let plaintext = r#"{"a":1,"note":"legacy entry long enough"}"#;
        let legacy = encrypt_legacy(plaintext, "1234");
        let is_json = |text: &str| serde_json::from_str::<serde_json::Value>(text).is_ok();

        assert_eq!(decrypt_payload_with(&key, &legacy, is_json).unwrap(), plaintext);
        // Rejecting the legacy reading falls back to the current one.
        assert_eq!(
            decrypt_payload_with(&key, &legacy, |_| false).unwrap(),
            &plaintext[IV_SIZE..]
        );
    }

    #[test]
    fn test_short_legacy_payload_decrypts() {
        // A single-block legacy blob is exactly IV_SIZE long and never
        // enters the new-format branch.
        let legacy = encrypt_legacy("tiny", "1234");
        assert_eq!(STANDARD.decode(&legacy).unwrap().len(), IV_SIZE);
        assert_eq!(decrypt(&legacy, "1234"), "tiny");
    }

    #[test]
    fn test_wrong_key_returns_empty() {
        let encrypted = encrypt("a reasonably long payload for the test", "right-key");
        let decrypted = decrypt(&encrypted, "wrong-key");
        assert_ne!(decrypted, "a reasonably long payload for the test");
    }

    #[test]
    fn test_garbage_returns_empty() {
        assert_eq!(decrypt("not base64 at all!", "secret"), "");
        assert_eq!(decrypt("", "secret"), "");
    }

    #[test]
    fn test_payload_variant_reports_errors() {
        let key = derive_key("secret");
        assert!(matches!(
            decrypt_payload(&key, "%%%"),
            Err(CryptoError::Encoding(_))
        ));
        assert!(decrypt_payload(&key, "").is_err());
    }
}
