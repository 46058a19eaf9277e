//! Shared SHA-256 digest helpers.
//!
//! Used for configuration tokens, datasource ids and per-table cache tags.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use sha2::{Digest, Sha256};

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// Standard base64 of the SHA-256 digest, truncated to `len` characters.
pub fn sha256_base64_prefix(data: &[u8], len: usize) -> String {
    let encoded = STANDARD.encode(Sha256::digest(data));
    encoded.chars().take(len).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_input_produces_known_hash() {
        let hash = sha256_hex(b"");
        assert_eq!(
            hash,
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn consistent_output() {
        let data = b"hello world";
        assert_eq!(sha256_hex(data), sha256_hex(data));
        assert_eq!(sha256_hex(data).len(), 64);
    }

    #[test]
    fn base64_prefix_of_empty_input() {
        // base64(sha256("")) = "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="
        assert_eq!(sha256_base64_prefix(b"", 6), "47DEQp");
    }

    #[test]
    fn base64_prefix_respects_length() {
        assert_eq!(sha256_base64_prefix(b"abc", 3).len(), 3);
        assert_eq!(sha256_base64_prefix(b"abc", 100).len(), 44);
    }
}
