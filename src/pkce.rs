use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::Rng;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

/// Generates a cryptographically random code verifier for PKCE.
///
/// Returns a 64-character URL-safe string (RFC 7636 compliant, 43-128 chars).
#[must_use]
pub fn generate_code_verifier() -> String {
    let random_bytes: [u8; 48] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(random_bytes)
}

/// Computes the S256 code challenge from a code verifier.
///
/// `challenge = BASE64URL(SHA256(verifier))`
#[must_use]
pub fn generate_code_challenge(verifier: &str) -> String {
    let hash = Sha256::digest(verifier.as_bytes());
    URL_SAFE_NO_PAD.encode(hash)
}

/// Generates a random anti-replay token (used for both `state` and `nonce`).
///
/// Returns a 22-character URL-safe string (16 random bytes → base64url).
#[must_use]
pub fn generate_state() -> String {
    let random_bytes: [u8; 16] = rand::rng().random();
    URL_SAFE_NO_PAD.encode(random_bytes)
}

/// Compares a callback `state` (or `nonce`) against the expected value without
/// short-circuiting on the first differing byte.
#[must_use]
pub fn tokens_match(expected: &str, received: &str) -> bool {
    expected.as_bytes().ct_eq(received.as_bytes()).into()
}

/// Single-use PKCE and anti-replay material for one authorization attempt.
///
/// Never cloned: the request that owns it is consumed by the exchange, and a
/// retry builds a fresh one with [`PkceMaterial::fresh`].
pub struct PkceMaterial {
    verifier: String,
    challenge: String,
    state: String,
    nonce: String,
}

impl PkceMaterial {
    #[must_use]
    pub fn fresh() -> Self {
        let verifier = generate_code_verifier();
        let challenge = generate_code_challenge(&verifier);
        Self {
            verifier,
            challenge,
            state: generate_state(),
            nonce: generate_state(),
        }
    }

    #[must_use]
    pub fn challenge(&self) -> &str {
        &self.challenge
    }

    #[must_use]
    pub fn state(&self) -> &str {
        &self.state
    }

    #[must_use]
    pub fn nonce(&self) -> &str {
        &self.nonce
    }

    /// Gives up the verifier; the material is spent afterwards.
    #[must_use]
    pub fn into_verifier(self) -> String {
        self.verifier
    }

    #[must_use]
    pub fn verifier(&self) -> &str {
        &self.verifier
    }
}

impl std::fmt::Debug for PkceMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PkceMaterial")
            .field("challenge", &self.challenge)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_verifier_length() {
        let verifier = generate_code_verifier();
        assert_eq!(verifier.len(), 64);
    }

    #[test]
    fn test_code_verifier_url_safe() {
        let verifier = generate_code_verifier();
        assert!(
            verifier
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'),
            "verifier should be URL-safe: {}",
            verifier
        );
    }

    #[test]
    fn test_code_challenge_rfc7636_vector() {
        // RFC 7636 appendix B
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        assert_eq!(
            generate_code_challenge(verifier),
            "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM"
        );
    }

    #[test]
    fn test_fresh_material_is_never_reused() {
        let a = PkceMaterial::fresh();
        let b = PkceMaterial::fresh();
        assert_ne!(a.verifier(), b.verifier());
        assert_ne!(a.state(), b.state());
        assert_ne!(a.nonce(), b.nonce());
        assert_ne!(a.state(), a.nonce());
    }

    #[test]
    fn test_fresh_material_challenge_matches_verifier() {
        let m = PkceMaterial::fresh();
        assert_eq!(m.challenge(), generate_code_challenge(m.verifier()));
    }

    #[test]
    fn test_state_length() {
        assert_eq!(generate_state().len(), 22);
    }

    #[test]
    fn test_tokens_match() {
        assert!(tokens_match("abc", "abc"));
        assert!(!tokens_match("abc", "abd"));
        assert!(!tokens_match("abc", "ab"));
        assert!(!tokens_match("abc", ""));
    }

    #[test]
    fn test_debug_hides_verifier() {
        let m = PkceMaterial::fresh();
        assert!(!format!("{m:?}").contains(m.verifier()));
    }
}
