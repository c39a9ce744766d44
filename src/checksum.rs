//! # Checksums
//!
//! Stable digests for values and cache keys.
//!
//! `DefaultHasher` is not stable across Rust releases, so anything persisted
//! (annotations, cache file names) uses SHA-256.

use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 digest
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_hex_known_value() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_sha256_hex_length() {
        assert_eq!(sha256_hex(b"").len(), 64);
    }
}
