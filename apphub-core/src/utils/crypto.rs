use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// Compare two byte strings without short-circuiting on content.
///
/// Inputs of different length return `false` immediately, so length is not
/// hidden. Equal-length inputs are compared in constant time.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }

    a.ct_eq(b).into()
}

/// HMAC-SHA256 of `payload` keyed with `secret`, lowercase hex.
pub fn hmac_sha256_hex(payload: &[u8], secret: &[u8]) -> Result<String, anyhow::Error> {
    let mut mac = HmacSha256::new_from_slice(secret)
        .map_err(|e| anyhow::anyhow!("Invalid key length: {}", e))?;

    mac.update(payload);
    let result = mac.finalize();

    Ok(hex::encode(result.into_bytes()))
}

pub fn sha256(input: &[u8]) -> [u8; 32] {
    Sha256::digest(input).into()
}

/// URL-safe base64 without padding (RFC 4648 §5).
pub fn base64url_encode(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

/// PKCE `S256` code challenge for a code verifier.
pub fn pkce_challenge(code_verifier: &str) -> String {
    base64url_encode(&sha256(code_verifier.as_bytes()))
}

/// `length_bytes` bytes from the OS CSPRNG, hex encoded (output is twice as long).
pub fn secure_random_hex(length_bytes: usize) -> String {
    let mut bytes = vec![0u8; length_bytes];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_constant_time_eq_matches_ordinary_equality() {
        let samples = ["", "a", "abc", "abd", "sha256=00ff", "sha256=00fe"];

        for a in samples {
            for b in samples {
                assert_eq!(
                    constant_time_eq(a.as_bytes(), b.as_bytes()),
                    a == b,
                    "{:?} vs {:?}",
                    a,
                    b
                );
            }
        }
    }

    #[test]
    fn test_constant_time_eq_rejects_different_lengths() {
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(!constant_time_eq(b"", b"a"));
    }

    #[test]
    fn test_hmac_known_vector() {
        // RFC 4231 test case 2
        let mac = hmac_sha256_hex(b"what do ya want for nothing?", b"Jefe").unwrap();
        assert_eq!(
            mac,
            "5bdcc146bf60754e6a042426089575c75a003f089d2739839dec58b964ec3843"
        );
    }

    #[test]
    fn test_hmac_signature_detects_single_bit_flips() {
        let payload = br#"{"id":"evt_1","type":"user.created"}"#;
        let secret = b"whsec_test";
        let signature = hmac_sha256_hex(payload, secret).unwrap();

        for i in 0..payload.len() {
            for bit in 0..8 {
                let mut mutated = payload.to_vec();
                mutated[i] ^= 1 << bit;
                let other = hmac_sha256_hex(&mutated, secret).unwrap();
                assert!(!constant_time_eq(other.as_bytes(), signature.as_bytes()));
            }
        }
    }

    #[test]
    fn test_pkce_challenge_is_deterministic_and_url_safe() {
        let verifier = "dBjftJeZ4CVP-mB92K27uhbUJU1p1r_wW1gFWFOEjXk";
        let challenge = pkce_challenge(verifier);

        // RFC 7636 appendix B
        assert_eq!(challenge, "E9Melhoa2OwvFrEMTJguCHaoeK1t8URWbuGJSstw-cM");
        assert_eq!(challenge, pkce_challenge(verifier));
        assert!(!challenge.contains('+'));
        assert!(!challenge.contains('/'));
        assert!(!challenge.contains('='));
    }

    #[test]
    fn test_secure_random_hex_length_and_uniqueness() {
        let a = secure_random_hex(32);
        let b = secure_random_hex(32);

        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }
}
