//! AES-256-GCM encryption for values the file store writes to disk.
//!
//! The encryption key is a 32-byte key provided as a hex-encoded string (64 characters).

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::crypto;
use crate::error::{storage_error, Error, ErrorKind, StorageErrorKind};

/// 12-byte nonce size for AES-GCM
const NONCE_SIZE: usize = 12;

/// Encrypts plaintext using AES-256-GCM with a random nonce.
///
/// The nonce is prepended to the ciphertext, and the result is base64-encoded.
pub fn encrypt(plaintext: &str, key_hex: &str) -> Result<String, Error> {
    let key = parse_key(key_hex)?;
    let cipher = Aes256Gcm::new_from_slice(&key)
        .map_err(|_| storage_error(StorageErrorKind::EncryptionFailed, "invalid key length"))?;

    let nonce_bytes = crypto::secure_random_bytes(NONCE_SIZE)?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext.as_bytes())
        .map_err(|_| storage_error(StorageErrorKind::EncryptionFailed, "encryption failed"))?;

    let mut combined = nonce_bytes;
    combined.extend(ciphertext);

    Ok(BASE64.encode(combined))
}

/// Decrypts a base64-encoded ciphertext that was encrypted with `encrypt()`.
pub fn decrypt(ciphertext_b64: &str, key_hex: &str) -> Result<String, Error> {
    let key = parse_key(key_hex)?;
    let cipher = Aes256Gcm::new_from_slice(&key).map_err(|_| decryption_err())?;

    let combined = BASE64.decode(ciphertext_b64).map_err(|e| Error {
        source: Some(Box::new(e)),
        error_kind: ErrorKind::Storage(StorageErrorKind::DecryptionFailed),
    })?;

    if combined.len() < NONCE_SIZE {
        return Err(decryption_err());
    }

    let (nonce_bytes, ciphertext) = combined.split_at(NONCE_SIZE);
    let nonce = Nonce::from_slice(nonce_bytes);

    let plaintext_bytes = cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| decryption_err())?;

    String::from_utf8(plaintext_bytes).map_err(|e| Error {
        source: Some(Box::new(e)),
        error_kind: ErrorKind::Storage(StorageErrorKind::DecryptionFailed),
    })
}

fn decryption_err() -> Error {
    storage_error(StorageErrorKind::DecryptionFailed, "decryption failed")
}

fn parse_key(key_hex: &str) -> Result<[u8; 32], Error> {
    let bytes = hex::decode(key_hex).map_err(|e| Error {
        source: Some(Box::new(e)),
        error_kind: ErrorKind::Storage(StorageErrorKind::EncryptionFailed),
    })?;
    bytes.try_into().map_err(|_| {
        storage_error(
            StorageErrorKind::EncryptionFailed,
            "encryption key must be 32 bytes",
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEST_KEY: &str = "0123456789abcdef0123456789abcdef0123456789abcdef0123456789abcdef";

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let plaintext = r#"{"provider":"google","state":"abc"}"#;
        let encrypted = encrypt(plaintext, TEST_KEY).expect("encryption should succeed");
        assert_ne!(encrypted, plaintext);
        let decrypted = decrypt(&encrypted, TEST_KEY).expect("decryption should succeed");
        assert_eq!(decrypted, plaintext);
    }

    #[test]
    fn test_encrypt_produces_different_outputs() {
        let encrypted1 = encrypt("same", TEST_KEY).unwrap();
        let encrypted2 = encrypt("same", TEST_KEY).unwrap();
        assert_ne!(encrypted1, encrypted2);
    }

    #[test]
    fn test_invalid_key_returns_encryption_failed() {
        let result = encrypt("test", "not-valid-hex!");
        assert!(matches!(
            result,
            Err(Error {
                error_kind: ErrorKind::Storage(StorageErrorKind::EncryptionFailed),
                ..
            })
        ));

        let result = encrypt("test", "abcd");
        assert!(matches!(
            result,
            Err(Error {
                error_kind: ErrorKind::Storage(StorageErrorKind::EncryptionFailed),
                ..
            })
        ));
    }

    #[test]
    fn test_wrong_key_returns_decryption_failed() {
        let encrypted = encrypt("secret", TEST_KEY).unwrap();
        let wrong_key = "ffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffffff";
        let result = decrypt(&encrypted, wrong_key);
        assert!(matches!(
            result,
            Err(Error {
                error_kind: ErrorKind::Storage(StorageErrorKind::DecryptionFailed),
                ..
            })
        ));
    }

    #[test]
    fn test_corrupted_ciphertext_returns_decryption_failed() {
        let result = decrypt("not_valid_base64!!!", TEST_KEY);
        assert!(matches!(
            result,
            Err(Error {
                error_kind: ErrorKind::Storage(StorageErrorKind::DecryptionFailed),
                ..
            })
        ));

        // "abc" in base64 is shorter than a nonce
        let result = decrypt("YWJj", TEST_KEY);
        assert!(result.is_err());
    }
}
