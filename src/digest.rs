//! SHA-256 helpers.
//!
//! Chunk ids, stored-bytes checksums, the global object checksum, and the
//! metadata section checksum are all SHA-256 — collision-resistant, but not
//! authenticated against a deliberate adversary. Centralised here so every
//! call site hashes the same way.

use sha2::{Digest, Sha256};

/// SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// Lowercase hex encoding of a SHA-256 digest.
pub fn sha256_hex(digest: &[u8; 32]) -> String {
    hex::encode(digest)
}
