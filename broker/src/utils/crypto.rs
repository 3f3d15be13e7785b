//! Cryptographic utility functions

use hmac::{Hmac, Mac};
use sha2::Sha256;
use subtle::ConstantTimeEq;

type HmacSha256 = Hmac<Sha256>;

/// HMAC-SHA256 signature of `data` with `secret`, hex encoded
pub fn sign(secret: &[u8], data: &str) -> String {
    let mut mac = HmacSha256::new_from_slice(secret).expect("HMAC accepts any key length");
    mac.update(data.as_bytes());
    hex::encode(mac.finalize().into_bytes())
}

/// Constant-time string comparison to prevent timing attacks
pub fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

/// Verify a hex HMAC-SHA256 signature in constant time
pub fn verify(secret: &[u8], data: &str, signature: &str) -> bool {
    constant_time_eq(&sign(secret, data), signature)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sign_deterministic() {
        let s1 = sign(b"secret", "payload");
        let s2 = sign(b"secret", "payload");
        assert_eq!(s1, s2);

        // Hex encoded (64 chars for SHA256)
        assert_eq!(s1.len(), 64);
        assert!(s1.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_sign_key_sensitivity() {
        assert_ne!(sign(b"secret", "payload"), sign(b"other", "payload"));
        assert_ne!(sign(b"secret", "payload"), sign(b"secret", "payload2"));
    }

    #[test]
    fn test_verify() {
        let sig = sign(b"secret", "payload");
        assert!(verify(b"secret", "payload", &sig));
        assert!(!verify(b"secret", "tampered", &sig));
        assert!(!verify(b"wrong", "payload", &sig));
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq("hello", "hello"));
        assert!(!constant_time_eq("hello", "world"));
        assert!(!constant_time_eq("hello", "hell"));
        assert!(!constant_time_eq("", "x"));
        assert!(constant_time_eq("", ""));
    }
}
