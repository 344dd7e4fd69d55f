//! Truncated SHA-256: `H(x1, .., xn) = SHA256(x1 || .. || xn)[..16]`.
//!
//! Used for handshake peer authentication, frame auth tags, and the
//! per-direction rolling key derivation.

use sha2::{Digest, Sha256};

pub const HASH_LEN: usize = 16;

/// Hashes the concatenation of every slice and truncates to 16 bytes.
pub fn hash(parts: &[&[u8]]) -> [u8; HASH_LEN] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    let digest = hasher.finalize();
    let mut out = [0u8; HASH_LEN];
    out.copy_from_slice(&digest[..HASH_LEN]);
    out
}

/// Constant-time comparison of two equal-length byte slices.
///
/// The source this protocol was distilled from compares auth tags with a
/// short-circuiting `==`; this rewrite accumulates the XOR of every byte
/// pair so timing does not depend on the position of the first mismatch.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}
