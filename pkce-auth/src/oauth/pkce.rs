//! PKCE (Proof Key for Code Exchange) support for OAuth 2.0.
//!
//! Implements RFC 7636 for securing authorization code flows in public clients.

use std::fmt;

use crate::crypto;
use crate::error::Error;

/// The only challenge method this crate issues.
pub const CHALLENGE_METHOD_S256: &str = "S256";

/// Length of generated verifiers (the RFC 7636 maximum).
pub const VERIFIER_LENGTH: usize = 128;

const MIN_VERIFIER_LENGTH: usize = 43;

/// Length of an S256 challenge: 32 digest bytes in unpadded base64url.
pub const CHALLENGE_LENGTH: usize = 43;

/// PKCE code verifier (random string).
#[derive(Clone, PartialEq, Eq)]
pub struct PkceVerifier(String);

impl PkceVerifier {
    /// Generate a new random PKCE verifier.
    ///
    /// Creates a 128 character string over the unreserved alphabet from the OS CSPRNG.
    pub fn generate() -> Result<Self, Error> {
        Ok(Self(crypto::random_verifier(VERIFIER_LENGTH)?))
    }

    /// Create a PKCE verifier from an existing string.
    pub fn from_string(verifier: String) -> Self {
        Self(verifier)
    }

    /// Get the verifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Generate the corresponding code challenge.
    pub fn challenge(&self) -> PkceChallenge {
        PkceChallenge::from_verifier(self)
    }

    /// True when length and alphabet satisfy RFC 7636 section 4.1.
    pub fn is_well_formed(&self) -> bool {
        (MIN_VERIFIER_LENGTH..=VERIFIER_LENGTH).contains(&self.0.len())
            && self
                .0
                .bytes()
                .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'.' | b'_' | b'~'))
    }
}

impl fmt::Debug for PkceVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PkceVerifier(len={})", self.0.len())
    }
}

/// PKCE code challenge (SHA256 hash of verifier).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PkceChallenge(String);

impl PkceChallenge {
    /// Create a code challenge from a verifier.
    ///
    /// Uses SHA256 hashing and base64url encoding as per RFC 7636.
    pub fn from_verifier(verifier: &PkceVerifier) -> Self {
        let hash = crypto::sha256(verifier.as_str().as_bytes());
        Self(crypto::base64url_encode(&hash))
    }

    /// Get the challenge string.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Check that this challenge was derived from `verifier`.
    pub fn matches(&self, verifier: &PkceVerifier) -> bool {
        crypto::constant_time_eq(
            self.0.as_bytes(),
            Self::from_verifier(verifier).as_str().as_bytes(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pkce_verifier_generation() {
        let verifier = PkceVerifier::generate().unwrap();
        assert_eq!(verifier.as_str().len(), VERIFIER_LENGTH);
        assert!(verifier.is_well_formed());
    }

    #[test]
    fn test_pkce_challenge_generation() {
        let verifier = PkceVerifier::generate().unwrap();
        let challenge = verifier.challenge();
        assert_eq!(challenge.as_str().len(), CHALLENGE_LENGTH);
        assert!(!challenge.as_str().contains('='));
    }

    #[test]
    fn test_pkce_challenge_deterministic() {
        let verifier = PkceVerifier::from_string("test_verifier".to_string());
        let challenge1 = verifier.challenge();
        let challenge2 = verifier.challenge();
        assert_eq!(challenge1.as_str(), challenge2.as_str());
    }

    #[test]
    fn test_challenge_matches_only_its_verifier() {
        let verifier = PkceVerifier::generate().unwrap();
        let other = PkceVerifier::generate().unwrap();
        let challenge = verifier.challenge();
        assert!(challenge.matches(&verifier));
        assert!(!challenge.matches(&other));
    }

    #[test]
    fn test_malformed_verifiers() {
        assert!(!PkceVerifier::from_string("short".to_string()).is_well_formed());
        assert!(!PkceVerifier::from_string("a".repeat(129)).is_well_formed());
        assert!(!PkceVerifier::from_string(format!("{}+", "a".repeat(50))).is_well_formed());
        assert!(PkceVerifier::from_string("a".repeat(43)).is_well_formed());
    }

    #[test]
    fn test_debug_does_not_leak_verifier() {
        let verifier = PkceVerifier::from_string("super-secret-verifier-value".to_string());
        let debug = format!("{:?}", verifier);
        assert!(!debug.contains("super-secret"));
        assert!(debug.contains("len=27"));
    }
}
