//! Cryptographic building blocks for PKCE.
//!
//! Randomness always comes from the operating system CSPRNG. If it cannot be
//! reached the call fails with `Crypto(Unavailable)`; there is no weaker fallback.

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};

use crate::error::{crypto_error, Error};

/// RFC 7636 unreserved characters allowed in a code verifier.
const VERIFIER_ALPHABET: &[u8] =
    b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-._~";

/// Largest multiple of the alphabet size that fits in a byte; bytes at or above
/// it are rejected so every character is equally likely.
const REJECTION_LIMIT: u8 = (256 / VERIFIER_ALPHABET.len() * VERIFIER_ALPHABET.len()) as u8;

/// Return `n` bytes from the OS CSPRNG.
pub fn secure_random_bytes(n: usize) -> Result<Vec<u8>, Error> {
    fill_from(&mut OsRng, n)
}

/// SHA-256 digest of `bytes`.
pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hasher.finalize().into()
}

/// Base64url encoding without `=` padding.
pub fn base64url_encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// A base64url token carrying `n_bytes` of entropy.
pub fn random_token(n_bytes: usize) -> Result<String, Error> {
    Ok(base64url_encode(&secure_random_bytes(n_bytes)?))
}

/// A code verifier of `len` characters drawn uniformly from the unreserved alphabet.
pub fn random_verifier(len: usize) -> Result<String, Error> {
    verifier_from(&mut OsRng, len)
}

/// Compare two byte strings without short-circuiting on the first difference.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

pub(crate) fn fill_from<R: RngCore + ?Sized>(rng: &mut R, n: usize) -> Result<Vec<u8>, Error> {
    let mut buf = vec![0u8; n];
    rng.try_fill_bytes(&mut buf).map_err(|e| {
        tracing::error!("Secure random source unavailable: {}", e);
        crypto_error(&format!("secure random source unavailable: {}", e))
    })?;
    Ok(buf)
}

pub(crate) fn verifier_from<R: RngCore + ?Sized>(rng: &mut R, len: usize) -> Result<String, Error> {
    let mut verifier = String::with_capacity(len);
    while verifier.len() < len {
        // Roughly 23% of bytes are rejected; over-draw to usually finish in one pass.
        let batch = fill_from(rng, (len - verifier.len()) * 2)?;
        for byte in batch {
            if byte >= REJECTION_LIMIT {
                continue;
            }
            verifier.push(VERIFIER_ALPHABET[byte as usize % VERIFIER_ALPHABET.len()] as char);
            if verifier.len() == len {
                break;
            }
        }
    }
    Ok(verifier)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{CryptoErrorKind, ErrorKind};

    struct BrokenRng;

    impl RngCore for BrokenRng {
        fn next_u32(&mut self) -> u32 {
            0
        }

        fn next_u64(&mut self) -> u64 {
            0
        }

        fn fill_bytes(&mut self, _dest: &mut [u8]) {}

        fn try_fill_bytes(&mut self, _dest: &mut [u8]) -> Result<(), rand::Error> {
            Err(rand::Error::new("entropy source offline"))
        }
    }

    #[test]
    fn test_secure_random_bytes_length() {
        assert_eq!(secure_random_bytes(32).unwrap().len(), 32);
        assert!(secure_random_bytes(0).unwrap().is_empty());
    }

    #[test]
    fn test_broken_rng_fails_with_crypto_unavailable() {
        let result = fill_from(&mut BrokenRng, 16);
        assert!(matches!(
            result,
            Err(Error {
                error_kind: ErrorKind::Crypto(CryptoErrorKind::Unavailable),
                ..
            })
        ));

        let result = verifier_from(&mut BrokenRng, 128);
        assert!(result.is_err());
    }

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            hex::encode(sha256(b"abc")),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_sha256_and_base64url_are_pure() {
        let input = b"dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(sha256(input), sha256(input));
        assert_eq!(base64url_encode(input), base64url_encode(input));
    }

    #[test]
    fn test_base64url_has_no_padding_or_unsafe_chars() {
        // 0xfb 0xff encodes to "+/8=" in standard base64
        let encoded = base64url_encode(&[0xfb, 0xff]);
        assert_eq!(encoded, "-_8");
    }

    #[test]
    fn test_rfc7636_appendix_b_challenge() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            base64url_encode(&sha256(verifier.as_bytes())),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_random_verifier_alphabet_and_length() {
        let verifier = random_verifier(128).unwrap();
        assert_eq!(verifier.len(), 128);
        assert!(verifier.bytes().all(|b| VERIFIER_ALPHABET.contains(&b)));
    }

    #[test]
    fn test_random_token_entropy_length() {
        // 32 bytes -> 43 base64url characters
        assert_eq!(random_token(32).unwrap().len(), 43);
        assert_ne!(random_token(32).unwrap(), random_token(32).unwrap());
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"state", b"state"));
        assert!(!constant_time_eq(b"state", b"statf"));
        assert!(!constant_time_eq(b"state", b"stat"));
    }
}
