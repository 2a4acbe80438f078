//! Content fingerprinting for publication verification.
//!
//! A submission's fingerprint is computed once at intake; the daemon later
//! compares it against the fingerprint of the catalog-published content to
//! decide whether a record has gone live.

use sha2::{Digest, Sha256};

/// Compute the SHA-256 hex digest of a byte buffer.
pub fn sha256_hex(buffer: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(buffer);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_digest_is_hex_and_stable() {
        let a = sha256_hex(b"station metadata");
        let b = sha256_hex(b"station metadata");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_digest_differs_on_content() {
        assert_ne!(sha256_hex(b"a"), sha256_hex(b"b"));
    }

    #[test]
    fn test_known_vector() {
        // SHA-256 of the empty buffer
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
