//! Message id generation
//!
//! Ids are short URL-safe strings, unique enough for queue lifetimes
//! (64^10 ≈ 1.15e18 combinations). Uses OsRng (CSPRNG) so distinct
//! processes cannot collide by seeding.

use rand::Rng;
use rand::rngs::OsRng;

use crate::core::constants::MESSAGE_ID_LENGTH;

const CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789_-";

/// Generate a fresh URL-safe message id
pub fn generate() -> String {
    random_string(MESSAGE_ID_LENGTH)
}

/// Generate a random URL-safe string of arbitrary length
pub fn random_string(len: usize) -> String {
    (0..len)
        .map(|_| CHARSET[OsRng.gen_range(0..CHARSET.len())] as char)
        .collect()
}

/// Check whether a string is a well-formed message id
pub fn is_valid(id: &str) -> bool {
    id.len() == MESSAGE_ID_LENGTH && id.bytes().all(|b| CHARSET.contains(&b))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generate_length() {
        assert_eq!(generate().len(), MESSAGE_ID_LENGTH);
    }

    #[test]
    fn test_generate_charset() {
        let id = generate();
        assert!(id.bytes().all(|b| CHARSET.contains(&b)));
        assert!(is_valid(&id));
    }

    #[test]
    fn test_generate_uniqueness() {
        let a = generate();
        let b = generate();
        assert_ne!(a, b);
    }

    #[test]
    fn test_is_valid_rejects() {
        assert!(!is_valid("short"));
        assert!(!is_valid("has space !"));
        assert!(!is_valid("elevenchars"));
    }

    #[test]
    fn test_random_string_length() {
        assert_eq!(random_string(16).len(), 16);
        assert_eq!(random_string(0).len(), 0);
    }
}
