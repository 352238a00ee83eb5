//! SHA-256 helpers shared by every consensus structure.

use sha2::{Digest, Sha256};

/// A 32-byte SHA-256 digest.
pub type Hash32 = [u8; 32];

/// Single-shot SHA-256.
#[inline]
pub fn sha256(data: &[u8]) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 over the concatenation `a ‖ b`.
#[inline]
pub fn sha256_pair(a: &[u8], b: &[u8]) -> Hash32 {
    let mut hasher = Sha256::new();
    hasher.update(a);
    hasher.update(b);
    hasher.finalize().into()
}

/// SHA-256 of the empty string; the seed of every hash chain in the
/// protocol (operations hash, safebox hash).
#[inline]
pub fn empty_hash() -> Hash32 {
    sha256(b"")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_hash_matches_known_vector() {
        assert_eq!(
            hex::encode(empty_hash()),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn pair_is_concatenation() {
        assert_eq!(sha256_pair(b"ab", b"cd"), sha256(b"abcd"));
    }
}
